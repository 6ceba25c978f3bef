//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(name = "imagebuilder", about = "Firmware update image producer")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Create an update image from a raw firmware binary.
    Create {
        /// Plaintext firmware binary.
        #[clap(short, long)]
        input: PathBuf,
        /// Output image path.
        #[clap(short, long)]
        output: PathBuf,
        /// Firmware version as MAJOR.MINOR.PATCH; required with
        /// --anti-rollback.
        #[clap(long)]
        firmware_version: Option<semver::Version>,
        /// Mark the image as anti-rollback protected.
        #[clap(long)]
        anti_rollback: bool,
        /// Pad so the in-slot vector table satisfies the MCU alignment.
        #[clap(long)]
        vtor_align: bool,
        /// Body encryption: "aes-cbc" or "aes-ctr". The key length picks
        /// AES-128 or AES-256.
        #[clap(long)]
        enc_algo: Option<String>,
        /// Encryption key, hex or a path to a key file.
        #[clap(long)]
        enc_key: Option<String>,
        /// Integrity digest: crc32, md5, sha1, sha224, sha256, sha384 or
        /// sha512. Defaults to sha256.
        #[clap(long)]
        integrity_algo: Option<String>,
        /// Authentication: "hmac-sha256" or "hmac-sha512".
        #[clap(long)]
        auth_algo: Option<String>,
        /// Authentication key, hex or a path to a key file.
        #[clap(long)]
        auth_key: Option<String>,
        /// Signature: "ecdsa-sha256" or "rsa-sha256".
        #[clap(long)]
        sign_algo: Option<String>,
        /// Path to the PEM-encoded signing key.
        #[clap(long)]
        sign_key: Option<PathBuf>,
        /// Path to a TOML profile supplying defaults.
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// Extra logging to stderr.
        #[clap(short, long)]
        verbose: bool,
    },
    /// Dump the header of an existing image to stdout.
    Dump {
        /// The image file.
        #[clap(short, long)]
        input: PathBuf,
    },
}
