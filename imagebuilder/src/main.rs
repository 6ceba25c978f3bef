use std::ffi::OsString;
use std::io::Write;
use std::path::Path;

use colored::Colorize;
use fwimage::{AppDescriptor, AuthAlgo, EncAlgo, Flags, HashAlgo, Header, SigAlgo, TrailerLayout};

mod args;
mod keys;
mod pipeline;

#[cfg(test)]
mod tests;

fn main() -> std::process::ExitCode {
    main_args(
        std::env::args_os(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(e.exit_code())
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match args::args(args)? {
        args::Args::Dump { input } => dump(&input, &mut stdout),
        args::Args::Create(opts) => {
            if opts.verbose {
                init_tracing();
            }

            let binary = std::fs::read(&opts.input).map_err(Error::ReadInputFile)?;
            tracing::debug!(input = %opts.input.display(), len = binary.len(), "read input");

            let signer = match (&opts.sign_algo, &opts.sign_key) {
                (SigAlgo::None, _) | (_, None) => None,
                (algo, Some(path)) => {
                    let key_path = path.clone();
                    Some(keys::Signer::load(*algo, path, move || {
                        prompt_passphrase(&key_path)
                    })?)
                }
            };

            let build_time = chrono::Utc::now()
                .timestamp()
                .try_into()
                .expect("system clock before 1970");
            let image = pipeline::build_image(&binary, &opts, signer.as_ref(), build_time)?;
            pipeline::write_atomic(&opts.output, &image)?;
            tracing::debug!(output = %opts.output.display(), "image written");
            Ok(())
        }
    }
}

/// Print the parsed header (and descriptor, when readable) of an image.
fn dump(path: &Path, stdout: &mut impl Write) -> Result<(), Error> {
    let image = std::fs::read(path).map_err(Error::ReadInputFile)?;
    let Some(header_bytes) = image.first_chunk::<{ fwimage::HEADER_LEN }>() else {
        return Err(Error::TruncatedImage(image.len()));
    };
    let header = Header::parse(header_bytes)?;
    let layout = TrailerLayout::for_header(&header);

    field(stdout, "magic", format_args!("firmware update image v1"))?;
    field(stdout, "version", format_args!("{}", header.fw_version))?;
    field(stdout, "flags", format_args!("{}", flag_names(header.flags)))?;
    field(stdout, "enc", format_args!("{}", enc_name(header.enc_algo)))?;
    field(
        stdout,
        "integrity",
        format_args!("{}", hash_name(header.hash_algo)),
    )?;
    field(stdout, "auth", format_args!("{}", auth_name(header.auth_algo)))?;
    field(
        stdout,
        "signature",
        format_args!("{}", sig_name(header.sig_algo)),
    )?;
    let plain = humansize::format_size(header.plain_len, humansize::BINARY);
    field(stdout, "plain", format_args!("{plain} ({})", header.plain_len))?;
    let cipher = humansize::format_size(header.cipher_len, humansize::BINARY);
    field(stdout, "cipher", format_args!("{cipher} ({})", header.cipher_len))?;
    field(stdout, "iv", format_args!("{}", hex::encode(header.iv)))?;
    field(
        stdout,
        "trailer",
        format_args!(
            "{} bytes (integrity {}, auth {}, signature {})",
            layout.total_len, layout.integrity_len, layout.auth_len, layout.sig_len
        ),
    )?;

    // The descriptor is only readable here when the body is plaintext.
    if !header.flags.contains(Flags::ENCRYPTED) {
        let offset = fwimage::HEADER_LEN;
        if let Some(desc_bytes) = image
            .get(offset..offset + fwimage::DESCRIPTOR_LEN)
            .and_then(|b| b.first_chunk::<{ fwimage::DESCRIPTOR_LEN }>())
        {
            let descriptor = AppDescriptor::parse(desc_bytes)?;
            field(
                stdout,
                "entry",
                format_args!("{:#010x}", descriptor.entry_point),
            )?;
            field(
                stdout,
                "stack",
                format_args!("{:#010x}", descriptor.stack_top),
            )?;
            field(stdout, "app", format_args!("{}", descriptor.app_version))?;
            let built = chrono::DateTime::from_timestamp(descriptor.build_time as i64, 0)
                .map(|t| t.to_string())
                .unwrap_or_else(|| "invalid".to_string());
            field(
                stdout,
                "built",
                format_args!("{built} ({})", descriptor.build_time),
            )?;
        }
    }
    Ok(())
}

fn field(stdout: &mut impl Write, name: &str, value: std::fmt::Arguments) -> Result<(), Error> {
    writeln!(stdout, "{:10} {value}", name.bold()).map_err(Error::Stdout)
}

fn flag_names(flags: Flags) -> String {
    let names = [
        (Flags::ENCRYPTED, "encrypted"),
        (Flags::HAS_MAC, "mac"),
        (Flags::HAS_SIGNATURE, "signature"),
        (Flags::ANTIROLLBACK, "anti-rollback"),
        (Flags::VTOR_ALIGNED, "vtor-aligned"),
    ];
    let set: Vec<&str> = names
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
    if set.is_empty() {
        "none".to_string()
    } else {
        set.join(" | ")
    }
}

fn enc_name(algo: EncAlgo) -> &'static str {
    match algo {
        EncAlgo::None => "none",
        EncAlgo::Aes128Cbc => "aes-128-cbc",
        EncAlgo::Aes256Cbc => "aes-256-cbc",
        EncAlgo::Aes128Ctr => "aes-128-ctr",
        EncAlgo::Aes256Ctr => "aes-256-ctr",
    }
}

fn hash_name(algo: HashAlgo) -> &'static str {
    match algo {
        HashAlgo::None => "none",
        HashAlgo::Crc32 => "crc32",
        HashAlgo::Md5 => "md5",
        HashAlgo::Sha1 => "sha1",
        HashAlgo::Sha224 => "sha224",
        HashAlgo::Sha256 => "sha256",
        HashAlgo::Sha384 => "sha384",
        HashAlgo::Sha512 => "sha512",
    }
}

fn auth_name(algo: AuthAlgo) -> &'static str {
    match algo {
        AuthAlgo::None => "none",
        AuthAlgo::HmacSha256 => "hmac-sha256",
        AuthAlgo::HmacSha512 => "hmac-sha512",
    }
}

fn sig_name(algo: SigAlgo) -> &'static str {
    match algo {
        SigAlgo::None => "none",
        SigAlgo::EcdsaP256Sha256 => "ecdsa-p256-sha256",
        SigAlgo::Rsa2048Sha256 => "rsa-2048-sha256",
    }
}

fn prompt_passphrase(path: &Path) -> std::io::Result<String> {
    eprint!("Enter passphrase for {}: ", path.display());
    std::io::stderr().flush()?;
    let mut passphrase = String::new();
    std::io::stdin().read_line(&mut passphrase)?;
    Ok(passphrase)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("imagebuilder=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    CreateTempFile(std::io::Error),
    Crypto(fwcrypto::CryptoError),
    Format(fwimage::Error),
    InputTooLarge { len: usize, max: u32 },
    InputTooSmall(usize),
    IvGeneration,
    Keys(keys::Error),
    PersistOutputFile(std::io::Error),
    ReadInputFile(std::io::Error),
    Stdout(std::io::Error),
    TruncatedImage(usize),
    WriteOutputFile(std::io::Error),
}

impl Error {
    /// 0 success, 1 bad arguments, 2 I/O, 3 crypto, 4 input too large.
    fn exit_code(&self) -> u8 {
        match self {
            Error::Args(_) | Error::InputTooSmall(_) | Error::TruncatedImage(_) => 1,
            Error::CreateTempFile(_)
            | Error::PersistOutputFile(_)
            | Error::ReadInputFile(_)
            | Error::Stdout(_)
            | Error::WriteOutputFile(_) => 2,
            Error::Crypto(_) | Error::Format(_) | Error::IvGeneration | Error::Keys(_) => 3,
            Error::InputTooLarge { .. } => 4,
        }
    }
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<keys::Error> for Error {
    fn from(e: keys::Error) -> Self {
        Error::Keys(e)
    }
}

impl From<fwimage::Error> for Error {
    fn from(e: fwimage::Error) -> Self {
        Error::Format(e)
    }
}

impl From<fwcrypto::CryptoError> for Error {
    fn from(e: fwcrypto::CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::CreateTempFile(e) => write!(f, "failed to create temporary file: {e}"),
            Error::Crypto(e) => write!(f, "crypto failure: {e}"),
            Error::Format(e) => write!(f, "image format error: {e}"),
            Error::InputTooLarge { len, max } => {
                write!(f, "input too large: {len} bytes, the image limit is {max}")
            }
            Error::InputTooSmall(len) => write!(
                f,
                "input too small: {len} bytes, need at least a vector table"
            ),
            Error::IvGeneration => write!(f, "system RNG failed while generating the IV"),
            Error::Keys(e) => write!(f, "{e}"),
            Error::PersistOutputFile(e) => {
                write!(f, "failed to move temporary file to output: {e}")
            }
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::TruncatedImage(len) => {
                write!(f, "file too short for an image header: {len} bytes")
            }
            Error::WriteOutputFile(e) => write!(f, "failed to write to output file: {e}"),
        }
    }
}

impl std::error::Error for Error {}
