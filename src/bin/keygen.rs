//! Ed25519 keypair generator for federation nodes.
//!
//! Usage:
//!   cargo run --bin keygen -- --name node-0 --output ./keys/

use clap::Parser;
use robot_node::crypto::Keypair;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keygen", version, about = "robot-node Ed25519 keypair generator")]
struct Args {
    /// Node name, used for the output file names
    #[arg(short, long)]
    name: String,

    /// Output directory for keys
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() {
    let args = Args::parse();

    fs::create_dir_all(&args.output).expect("failed to create output directory");

    let kp = Keypair::generate();
    let secret_path = args.output.join(format!("{}_secret.key", args.name));
    let public_path = args.output.join(format!("{}_public.key", args.name));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::write(&secret_path, kp.secret_bytes()).expect("failed to write secret key");
        let mut perms = fs::metadata(&secret_path).unwrap().permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&secret_path, perms).expect("failed to set key permissions");
    }
    #[cfg(not(unix))]
    {
        fs::write(&secret_path, kp.secret_bytes()).expect("failed to write secret key");
    }

    fs::write(&public_path, kp.public_key()).expect("failed to write public key");

    println!("node:       {}", args.name);
    println!("secret key: {}", secret_path.display());
    println!("public key: {}", public_path.display());
    println!("public key (hex): {}", hex::encode(kp.public_key()));
}
