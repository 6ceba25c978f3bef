use std::io::Write;

use bootmgr::mem::MemFlash;
use bootmgr::{Layout, Region, TrustAnchors, UpdateManager, UpdateState};
use fwimage::{Flags, Header, Version};

use crate::ExitCode;

mod input;

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("imagebuilder").chain(args),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}

fn binary_1k() -> Vec<u8> {
    vec![0xAA; 1024]
}

/// Feed a built image to the on-device consumer over simulated flash.
fn verify_on_device(
    image: &[u8],
    cipher_key: Option<&[u8]>,
    mac_key: Option<&[u8]>,
    sig_pubkey: Option<&[u8]>,
) -> Result<(), bootmgr::Error> {
    let layout = Layout {
        slot_a: Region::new(0x0000, 0x10000),
        slot_b: Region::new(0x10000, 0x10000),
        record_a: Region::new(0x20000, 0x1000),
        record_b: Region::new(0x21000, 0x1000),
        xip_base: 0x0800_0000,
    };
    let anchors = TrustAnchors {
        cipher_key,
        mac_key,
        sig_pubkey,
    };
    let mut manager = UpdateManager::new(
        MemFlash::<0x22000>::new(),
        layout,
        anchors,
        Version::default(),
    )
    .unwrap();
    manager.begin_update(None)?;
    for chunk in image.chunks(97) {
        manager.feed_bytes(chunk)?;
    }
    manager.finish_update()?;
    assert_eq!(manager.state(), UpdateState::Verified);
    Ok(())
}

/// Minimal integrity-only image: 1024 bytes with SHA-256 is exactly
/// 64 + 64 + 1024 + 32 bytes and the device accepts it.
#[test]
fn create_minimal_sha256() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
    ]);
    assert_eq!(result.exit_code, ExitCode(0));
    assert!(result.stdout.is_empty());
    assert!(result.stderr.is_empty());

    let image = std::fs::read(output.path()).unwrap();
    assert_eq!(image.len(), 1184);

    let header = Header::parse(image.first_chunk().unwrap()).unwrap();
    assert_eq!(header.fw_version, Version::new(1, 0, 0));
    assert_eq!(header.plain_len, 1088);
    assert_eq!(header.cipher_len, 1088);
    // Descriptor entry point comes from input bytes 4..8.
    assert_eq!(&image[64 + 4..64 + 8], &[0xAA; 4]);

    verify_on_device(&image, None, None, None).unwrap();
}

#[test]
fn create_with_crc32_integrity() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--integrity-algo",
        "crc32",
    ]);
    assert_eq!(result.exit_code, ExitCode(0));

    let image = std::fs::read(output.path()).unwrap();
    assert_eq!(image.len(), 64 + 64 + 1024 + 4);
    verify_on_device(&image, None, None, None).unwrap();
}

/// The full option set: AES-256-CBC, HMAC-SHA256, ECDSA-P256. The device
/// accepts the genuine image and pins a tampered byte on the integrity
/// digest.
#[test]
fn create_encrypted_authenticated_signed() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let sign_key = create_file(input::EC_PRIVATE_PEM);
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "2.1.0",
        "--enc-algo",
        "aes-cbc",
        "--enc-key",
        input::AES_KEY_HEX,
        "--auth-algo",
        "hmac-sha256",
        "--auth-key",
        input::HMAC_KEY_HEX,
        "--sign-algo",
        "ecdsa-sha256",
        "--sign-key",
        sign_key.path().to_str().unwrap(),
    ]);
    assert_eq!(result.exit_code, ExitCode(0));

    let image = std::fs::read(output.path()).unwrap();
    let header = Header::parse(image.first_chunk().unwrap()).unwrap();
    assert!(header.flags.contains(Flags::ENCRYPTED));
    assert!(header.flags.contains(Flags::HAS_MAC));
    assert!(header.flags.contains(Flags::HAS_SIGNATURE));
    assert_eq!(header.plain_len, 1088);
    // PKCS#7: one whole pad block for an aligned plaintext.
    assert_eq!(header.cipher_len, 1104);
    assert_eq!(image.len(), 64 + 1104 + 32 + 32 + 64);

    let aes_key = hex::decode(input::AES_KEY_HEX).unwrap();
    let hmac_key = hex::decode(input::HMAC_KEY_HEX).unwrap();
    let ec_pub = hex::decode(input::EC_PUBKEY_HEX).unwrap();
    verify_on_device(&image, Some(&aes_key), Some(&hmac_key), Some(&ec_pub)).unwrap();

    let mut tampered = image.clone();
    tampered[200] ^= 0x01;
    assert_eq!(
        verify_on_device(&tampered, Some(&aes_key), Some(&hmac_key), Some(&ec_pub)),
        Err(bootmgr::Error::IntegrityMismatch)
    );
}

#[test]
fn create_ctr_mode() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--enc-algo",
        "aes-ctr",
        "--enc-key",
        input::AES_KEY_HEX,
    ]);
    assert_eq!(result.exit_code, ExitCode(0));

    let image = std::fs::read(output.path()).unwrap();
    let aes_key = hex::decode(input::AES_KEY_HEX).unwrap();
    verify_on_device(&image, Some(&aes_key), None, None).unwrap();
}

/// RSA-2048 signing from both accepted PEM forms.
#[test]
fn create_rsa_signed() {
    for pem in [input::RSA_PRIVATE_PKCS8_PEM, input::RSA_PRIVATE_PKCS1_PEM] {
        let input = create_file(&binary_1k());
        let output = tempfile::NamedTempFile::new().unwrap();
        let sign_key = create_file(pem);
        let result = test([
            "create",
            "-i",
            input.path().to_str().unwrap(),
            "-o",
            output.path().to_str().unwrap(),
            "--firmware-version",
            "1.0.0",
            "--sign-algo",
            "rsa-sha256",
            "--sign-key",
            sign_key.path().to_str().unwrap(),
        ]);
        assert_eq!(result.exit_code, ExitCode(0));

        let image = std::fs::read(output.path()).unwrap();
        assert_eq!(image.len(), 64 + 1088 + 32 + 256);

        let rsa_pub = hex::decode(input::RSA_PUBKEY_PKCS1_DER_HEX).unwrap();
        verify_on_device(&image, None, None, Some(&rsa_pub)).unwrap();
    }
}

#[test]
fn create_vtor_aligned() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--vtor-align",
    ]);
    assert_eq!(result.exit_code, ExitCode(0));

    let image = std::fs::read(output.path()).unwrap();
    let header = Header::parse(image.first_chunk().unwrap()).unwrap();
    assert!(header.flags.contains(Flags::VTOR_ALIGNED));
    // Application payload pushed to the alignment boundary.
    assert_eq!(image.len(), 64 + 256 + 1024 + 32);
    verify_on_device(&image, None, None, None).unwrap();
}

/// Keys can come from files as raw bytes, not just hex arguments.
#[test]
fn auth_key_from_raw_file() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let key_file = create_file(&[0x11u8; 32]);
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--auth-algo",
        "hmac-sha256",
        "--auth-key",
        key_file.path().to_str().unwrap(),
    ]);
    assert_eq!(result.exit_code, ExitCode(0));

    let image = std::fs::read(output.path()).unwrap();
    verify_on_device(&image, None, Some(&[0x11u8; 32]), None).unwrap();
}

/// Options may come from a TOML profile, but not from both places.
#[test]
fn config_profile() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let config = create_file(
        format!(
            "auth-algo = \"hmac-sha256\"\nauth-key = \"{}\"\n",
            input::HMAC_KEY_HEX
        )
        .as_bytes(),
    );

    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--config",
        config.path().to_str().unwrap(),
    ]);
    assert_eq!(result.exit_code, ExitCode(0));
    let image = std::fs::read(output.path()).unwrap();
    let hmac_key = hex::decode(input::HMAC_KEY_HEX).unwrap();
    verify_on_device(&image, None, Some(&hmac_key), None).unwrap();

    // The same option in both places is an error, not a merge.
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--config",
        config.path().to_str().unwrap(),
        "--auth-algo",
        "hmac-sha256",
        "--auth-key",
        input::HMAC_KEY_HEX,
    ]);
    assert_eq!(result.exit_code, ExitCode(1));
    assert!(result
        .stderr
        .contains("auth-algo specified in both config and cli"));
}

#[test]
fn anti_rollback_requires_version() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--anti-rollback",
    ]);
    assert_eq!(result.exit_code, ExitCode(1));
    assert!(result
        .stderr
        .contains("--firmware-version is required with --anti-rollback"));
}

#[test]
fn invalid_algorithm_names() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--integrity-algo",
        "sha3",
    ]);
    assert_eq!(result.exit_code, ExitCode(1));
    assert!(result.stderr.contains("invalid integrity-algo"));

    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
        "--enc-algo",
        "aes-cbc",
    ]);
    assert_eq!(result.exit_code, ExitCode(1));
    assert!(result.stderr.contains("--enc-algo specified without"));
}

#[test]
fn missing_input_is_io_error() {
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        "/nonexistent/firmware.bin",
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
    ]);
    assert_eq!(result.exit_code, ExitCode(2));
    assert!(result.stderr.contains("failed to read input file"));
}

#[test]
fn oversized_input_rejected() {
    let input = create_file(&vec![0u8; 9 * 1024 * 1024]);
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.0.0",
    ]);
    assert_eq!(result.exit_code, ExitCode(4));
    assert!(result.stderr.contains("input too large"));
    // The output file was never replaced.
    assert!(std::fs::read(output.path()).unwrap().is_empty());
}

#[test]
fn dump_created_image() {
    let input = create_file(&binary_1k());
    let output = tempfile::NamedTempFile::new().unwrap();
    let result = test([
        "create",
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        output.path().to_str().unwrap(),
        "--firmware-version",
        "1.2.3",
        "--vtor-align",
    ]);
    assert_eq!(result.exit_code, ExitCode(0));

    let result = test(["dump", "-i", output.path().to_str().unwrap()]);
    assert_eq!(result.exit_code, ExitCode(0));
    assert!(result.stdout.contains("1.2.3"));
    assert!(result.stdout.contains("sha256"));
    assert!(result.stdout.contains("vtor-aligned"));
    // Plain and cipher lengths: descriptor + alignment pad + binary.
    assert!(result.stdout.contains("(1280)"));
    // Plaintext image, so the descriptor is printed too.
    assert!(result.stdout.contains("0xaaaaaaaa"));
    assert!(result.stderr.is_empty());
}

#[test]
fn dump_truncated_file() {
    let file = create_file(b"not an image");
    let result = test(["dump", "-i", file.path().to_str().unwrap()]);
    assert_eq!(result.exit_code, ExitCode(1));
    assert!(result.stderr.contains("too short"));
}

/// Encrypted PKCS#8 signing keys unlock with the prompted passphrase.
#[test]
fn encrypted_signing_key() {
    use fwimage::SigAlgo;

    let key_file = create_file(input::EC_ENCRYPTED_PEM);
    let signer = crate::keys::Signer::load(SigAlgo::EcdsaP256Sha256, key_file.path(), || {
        Ok("test1234".to_string())
    })
    .unwrap();

    // The decrypted key signs; the fixture public key verifies.
    use sha2::Digest;
    let mut digest = sha2::Sha256::new();
    digest.update(b"payload");
    let signature = signer.sign_digest(digest).unwrap();

    let ec_pub = hex::decode(input::EC_PUBKEY_HEX).unwrap();
    let mut verifier = fwcrypto::SigVerifier::new(SigAlgo::EcdsaP256Sha256, &ec_pub)
        .unwrap()
        .unwrap();
    verifier.update(b"payload");
    assert!(verifier.verify(&signature));

    // A wrong passphrase fails fast.
    let result = crate::keys::Signer::load(SigAlgo::EcdsaP256Sha256, key_file.path(), || {
        Ok("wrong".to_string())
    });
    assert!(matches!(result, Err(crate::keys::Error::DecryptKeyFailed)));
}
