//! TrueCrypt container module.
//!
//! A TrueCrypt volume is salt (64 bytes), an encrypted header (bytes
//! 64..512) and encrypted data from 128 KiB on; everything is
//! indistinguishable from random, which is what makes co-residence
//! possible: another format's bytes can stand in for the salt.
//!
//! Without `--truecrypt-new-salt` the whole header area ships verbatim.
//! With it, the first 64 bytes of the output (whatever another module put
//! there) become the salt: once placement is final the module decrypts the
//! stored header with the old salt, re-encrypts it against the bytes now
//! occupying [0, 64), and patches its header chunk in place.
//!
//! Header keys are PBKDF2-HMAC (RIPEMD-160 or SHA-512) and the header
//! cipher is AES-256 in XTS mode with data unit 0, as in the reference
//! implementation.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use aes::Aes256;
use aes::cipher::KeyInit;
use clap::{Arg, ArgAction, ArgMatches, Command};
use pbkdf2::pbkdf2_hmac;
use ripemd::Ripemd160;
use sha2::Sha512;
use tracing::{debug, info};
use xts_mode::{Xts128, get_tweak_default};

use crate::chunk::{Chunk, SharedBuf};
use crate::error::{Error, Result};
use crate::hooks::{HookBus, HookEvent, Topic};
use crate::module::Module;

pub const NAME: &str = "truecrypt";

const SALT_LEN: usize = 64;
/// Encrypted header region [64, 512)
const HEADER_LEN: usize = 448;
/// Data starts here; [512, 128 KiB) is reserved/hidden-volume space.
const DATA_AREA: usize = 128 * 1024;

const TC_PBKDF2_ROUNDS: u32 = 2000;
const VERA_PBKDF2_ROUNDS: u32 = 500_000;

#[derive(Debug, Clone, Copy)]
enum Kdf {
    Ripemd160,
    Sha512,
}

fn derive_header_key(password: &[u8], salt: &[u8], rounds: u32, kdf: Kdf) -> [u8; 64] {
    let mut key = [0u8; 64];
    match kdf {
        Kdf::Ripemd160 => pbkdf2_hmac::<Ripemd160>(password, salt, rounds, &mut key),
        Kdf::Sha512 => pbkdf2_hmac::<Sha512>(password, salt, rounds, &mut key),
    }
    key
}

/// XTS needs two AES-256 keys; TrueCrypt stacks them in the derived 64
/// bytes, primary first.
fn header_cipher(key: &[u8; 64]) -> Result<Xts128<Aes256>> {
    let primary = Aes256::new_from_slice(&key[..32])
        .map_err(|_| Error::invalid_input("bad header key length"))?;
    let secondary = Aes256::new_from_slice(&key[32..])
        .map_err(|_| Error::invalid_input("bad header key length"))?;
    Ok(Xts128::new(primary, secondary))
}

fn rounds(vera: bool) -> u32 {
    if vera { VERA_PBKDF2_ROUNDS } else { TC_PBKDF2_ROUNDS }
}

/// Decrypt a 448-byte header, trying each KDF the format allows.
///
/// Returns `None` when no derivation yields the `TRUE`/`VERA` magic, i.e.
/// wrong password or salt.
pub fn decrypt_header(
    header: &[u8],
    password: &[u8],
    salt: &[u8],
    vera: bool,
) -> Result<Option<Vec<u8>>> {
    if header.len() != HEADER_LEN {
        return Err(Error::invalid_input("TrueCrypt header must be 448 bytes"));
    }

    for kdf in [Kdf::Ripemd160, Kdf::Sha512] {
        let key = derive_header_key(password, salt, rounds(vera), kdf);
        let cipher = header_cipher(&key)?;
        let mut clear = header.to_vec();
        cipher.decrypt_sector(&mut clear, get_tweak_default(0));
        if matches!(&clear[..4], b"TRUE" | b"VERA") {
            debug!("header decrypted with {kdf:?}");
            return Ok(Some(clear));
        }
    }
    Ok(None)
}

/// Encrypt a 448-byte cleartext header against `salt` (SHA-512 KDF).
pub fn encrypt_header(
    clear: &[u8],
    password: &[u8],
    salt: &[u8],
    vera: bool,
) -> Result<Vec<u8>> {
    if clear.len() != HEADER_LEN {
        return Err(Error::invalid_input("TrueCrypt header must be 448 bytes"));
    }

    let key = derive_header_key(password, salt, rounds(vera), Kdf::Sha512);
    let cipher = header_cipher(&key)?;
    let mut out = clear.to_vec();
    cipher.encrypt_sector(&mut out, get_tweak_default(0));
    Ok(out)
}

#[derive(Default)]
struct TruecryptState {
    path: PathBuf,
    new_salt: bool,
    vera: bool,
    password: Vec<u8>,
    buf: SharedBuf,
    old_salt: Vec<u8>,
    old_header: Vec<u8>,
}

/// Relocates a TrueCrypt container and optionally re-salts its header.
#[derive(Default)]
pub struct TruecryptModule {
    state: Rc<RefCell<TruecryptState>>,
}

impl Module for TruecryptModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn params(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("truecrypt-file")
                .long("truecrypt-file")
                .value_name("PATH")
                .help_heading("TrueCrypt Options")
                .help("Source TrueCrypt container"),
        )
        .arg(
            Arg::new("truecrypt-new-salt")
                .long("truecrypt-new-salt")
                .action(ArgAction::SetTrue)
                .help_heading("TrueCrypt Options")
                .help("Re-encrypt the header against the bytes placed at [0, 64)"),
        )
        .arg(
            Arg::new("truecrypt-password")
                .long("truecrypt-password")
                .value_name("PASSWORD")
                .help_heading("TrueCrypt Options")
                .help("Password of the container"),
        )
        .arg(
            Arg::new("truecrypt-vera")
                .long("truecrypt-vera")
                .action(ArgAction::SetTrue)
                .help_heading("TrueCrypt Options")
                .help("Treat the container as VeraCrypt (stronger key derivation)"),
        )
    }

    fn setup(&mut self, args: &ArgMatches, hooks: &Rc<HookBus>) -> Result<()> {
        let path = args
            .get_one::<String>("truecrypt-file")
            .ok_or_else(|| Error::config("the --truecrypt-file option is required"))?;
        let new_salt = args.get_flag("truecrypt-new-salt");
        let password = args.get_one::<String>("truecrypt-password");

        if new_salt && password.is_none() {
            return Err(Error::config(
                "a password is required to re-encrypt the header against a new salt",
            ));
        }

        {
            let mut state = self.state.borrow_mut();
            state.path = PathBuf::from(path);
            state.new_salt = new_salt;
            state.vera = args.get_flag("truecrypt-vera");
            state.password = password.map(|p| p.as_bytes().to_vec()).unwrap_or_default();
        }

        if new_salt {
            let state = Rc::clone(&self.state);
            hooks.register(Topic::PlacementComplete, move |event| {
                let HookEvent::PlacementComplete { layout } = event else {
                    return Ok(());
                };
                let state = state.borrow();

                let new_salt = layout.read(0, SALT_LEN as i64);
                let clear = decrypt_header(
                    &state.old_header,
                    &state.password,
                    &state.old_salt,
                    state.vera,
                )?
                .ok_or_else(|| {
                    Error::invalid_input(
                        "TrueCrypt header did not decrypt with the given password",
                    )
                })?;

                let fresh =
                    encrypt_header(&clear, &state.password, &new_salt, state.vera)?;
                state.buf.write_at(SALT_LEN, &fresh);
                info!("header re-encrypted against salt {}", hex::encode(&new_salt[..8]));
                Ok(())
            });
        }

        Ok(())
    }

    fn chunks(&mut self) -> Result<Vec<Chunk>> {
        let mut state = self.state.borrow_mut();
        let data = std::fs::read(&state.path)?;
        let image_size = data.len();

        if image_size <= DATA_AREA {
            return Err(Error::invalid_input(format!(
                "TrueCrypt container is only {image_size} bytes; the data area starts at {DATA_AREA}"
            )));
        }

        state.old_salt = data[..SALT_LEN].to_vec();
        state.old_header = data[SALT_LEN..SALT_LEN + HEADER_LEN].to_vec();
        let buf = SharedBuf::new(data);

        let header_chunk = if state.new_salt {
            // Leave [0, 64) to whichever module claims it; those bytes
            // become the salt.
            Chunk::fixed(SALT_LEN as i64, HEADER_LEN, SALT_LEN, buf.clone())
        } else {
            Chunk::fixed(0, SALT_LEN + HEADER_LEN, 0, buf.clone())
        };

        let chunks = vec![
            header_chunk.with_module(NAME),
            Chunk::fixed(
                DATA_AREA as i64,
                image_size - DATA_AREA,
                DATA_AREA,
                buf.clone(),
            )
            .with_module(NAME),
        ];

        state.buf = buf;
        Ok(chunks)
    }
}
