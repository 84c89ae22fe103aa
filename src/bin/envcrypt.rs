//! # envcrypt
//!
//! Encrypts and decrypts `.env` content in the format the controller reads.
//!
//! ## Usage
//!
//! ```bash
//! # Encrypt every value of a .env file
//! envcrypt encrypt app.env --key "$CONFIG_DECRYPTION_KEY" > app.encrypted.env
//!
//! # Check what the controller would produce
//! envcrypt decrypt app.encrypted.env
//!
//! # Build the ConfigMap
//! kubectl create configmap my-config --from-file=.env=app.encrypted.env
//! kubectl label configmap my-config target-secret=my-secret decryption-secret=my-keys
//! ```
//!
//! The key defaults to the `CONFIG_DECRYPTION_KEY` environment variable.
//! Input is read from stdin when no file is given.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_secret_controller::parser::{encrypt_env, DotenvParser, EnvParser};
use std::io::Read;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Encrypt and decrypt .env content for env-secret-controller
#[derive(Parser)]
#[command(name = "envcrypt")]
#[command(about = "Encrypt and decrypt .env content for env-secret-controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Decryption key (defaults to CONFIG_DECRYPTION_KEY)
    #[arg(short, long, global = true, env = "CONFIG_DECRYPTION_KEY", hide_env_values = true)]
    key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt every plain value; already encrypted values are kept
    Encrypt {
        /// .env file to read (stdin when omitted)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Decrypt content and print the resulting variables
    Decrypt {
        /// .env file to read (stdin when omitted)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let key = cli.key.map(Zeroizing::new);

    match cli.command {
        Commands::Encrypt { file } => {
            let key = key.context("A key is required to encrypt (--key or CONFIG_DECRYPTION_KEY)")?;
            let content = read_input(file.as_ref())?;
            print!("{}", encrypt_env(&content, &key)?);
        }
        Commands::Decrypt { file } => {
            let content = read_input(file.as_ref())?;
            let values = DotenvParser.parse(&content, key.as_ref().map(|k| k.as_str()))?;
            for (name, value) in values {
                println!("{name}={value}");
            }
        }
    }

    Ok(())
}

fn read_input(file: Option<&PathBuf>) -> Result<Zeroizing<String>> {
    let mut content = Zeroizing::new(String::new());
    match file {
        Some(path) => {
            *content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read stdin")?;
        }
    }
    Ok(content)
}
