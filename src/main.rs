//! `pmt-unseal` - command-line front end for `pmt_recipient`.
//!
//! Reads a sealed Google Payment Method Token envelope and prints its
//! decrypted, signature-verified plaintext payload to stdout. Exits non-zero
//! with a one-line error on any failure; never prints which cryptographic
//! step failed (see `pmt_recipient::error::TokenError`).

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pmt_recipient::{ProtocolVersion, Recipient, TokenError};

#[derive(Parser, Debug)]
#[command(name = "pmt-unseal", version, about = "Unseal a Google Payment Method Token envelope")]
struct Args {
    /// Protocol version the envelope is expected to use.
    #[arg(long, value_enum, default_value = "ecv1")]
    protocol_version: ProtocolVersionArg,

    /// Sender identity the envelope's signature was computed against.
    #[arg(long, env = "PMT_SENDER_ID", default_value = "Google")]
    sender_id: String,

    /// Recipient identity the envelope's signature was computed against.
    #[arg(long, env = "PMT_RECIPIENT_ID")]
    recipient_id: String,

    /// Base64 DER X.509 SPKI sender verifying key. May be repeated.
    #[arg(long = "sender-key", env = "PMT_SENDER_KEYS", value_delimiter = ',')]
    sender_keys: Vec<String>,

    /// Path to a trusted-keys JSON document (Google's keys-JSON format).
    #[arg(long)]
    trusted_keys_file: Option<PathBuf>,

    /// Base64 DER PKCS#8 recipient private key. May be repeated to support
    /// key rotation.
    #[arg(long = "recipient-key", env = "PMT_RECIPIENT_KEYS", value_delimiter = ',')]
    recipient_keys: Vec<String>,

    /// Read the sealed envelope from this file instead of stdin.
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ProtocolVersionArg {
    Ecv1,
    Ecv2,
}

impl From<ProtocolVersionArg> for ProtocolVersion {
    fn from(value: ProtocolVersionArg) -> Self {
        match value {
            ProtocolVersionArg::Ecv1 => ProtocolVersion::ECv1,
            ProtocolVersionArg::Ecv2 => ProtocolVersion::ECv2,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(plaintext) => {
            println!("{plaintext}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("pmt-unseal: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<String, TokenError> {
    if args.sender_keys.is_empty() && args.trusted_keys_file.is_none() {
        return Err(TokenError::Configuration(
            "at least one of --sender-key or --trusted-keys-file is required".into(),
        ));
    }
    if args.recipient_keys.is_empty() {
        return Err(TokenError::Configuration("at least one --recipient-key is required".into()));
    }

    let mut builder = Recipient::builder()
        .protocol_version(args.protocol_version.into())
        .sender_id(args.sender_id)
        .recipient_id(args.recipient_id);

    for key in &args.sender_keys {
        builder = builder.add_sender_verifying_key_b64(key)?;
    }
    if let Some(path) = &args.trusted_keys_file {
        let json = fs::read_to_string(path)
            .map_err(|e| TokenError::Configuration(format!("failed to read {}: {e}", path.display())))?;
        builder = builder.sender_verifying_keys_json(json);
    }
    for key in &args.recipient_keys {
        builder = builder.add_recipient_private_key_b64(key)?;
    }

    let recipient = builder.build()?;
    let sealed = read_sealed_input(args.input.as_deref())?;
    recipient.unseal(sealed.trim())
}

fn read_sealed_input(path: Option<&std::path::Path>) -> Result<String, TokenError> {
    match path {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| TokenError::Configuration(format!("failed to read {}: {e}", path.display()))),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| TokenError::Configuration(format!("failed to read stdin: {e}")))?;
            Ok(buf)
        }
    }
}
