//! Write EIP-2335 validator keystores, one directory per participant pair.

use crate::{keys::Validator, Error};
use aes::Aes128;
use commonware_utils::hex;
use ctr::{
    cipher::{generic_array::GenericArray, KeyIvInit, StreamCipher},
    Ctr128BE,
};
use pbkdf2::pbkdf2_hmac;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};
use zeroize::Zeroizing;

/// Keystores in the lighthouse layout (`keys/0x<pk>/voting-keystore.json`).
pub const KEYS_DIR: &str = "keys";

/// Passwords in the lighthouse layout (`secrets/0x<pk>`).
pub const SECRETS_DIR: &str = "secrets";

/// Keystores in the teku layout (`teku-keys/0x<pk>.json`).
pub const TEKU_KEYS_DIR: &str = "teku-keys";

/// Passwords in the teku layout (`teku-secrets/0x<pk>.txt`).
pub const TEKU_SECRETS_DIR: &str = "teku-secrets";

const VOTING_KEYSTORE: &str = "voting-keystore.json";
const VERSION: u32 = 4;
const DKLEN: usize = 32;

/// Validator keys owned by one participant pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keystore {
    /// Pair index owning the keys.
    pub index: usize,
    pub dir: PathBuf,
    /// Validator indexes stored in `dir`.
    pub validators: Range<usize>,
    /// `0x`-prefixed public keys, in validator order.
    pub public_keys: Vec<String>,
}

impl Keystore {
    pub fn keys(&self) -> PathBuf {
        self.dir.join(KEYS_DIR)
    }

    pub fn secrets(&self) -> PathBuf {
        self.dir.join(SECRETS_DIR)
    }

    pub fn teku_keys(&self) -> PathBuf {
        self.dir.join(TEKU_KEYS_DIR)
    }

    pub fn teku_secrets(&self) -> PathBuf {
        self.dir.join(TEKU_SECRETS_DIR)
    }
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct KdfParams {
    dklen: usize,
    c: u32,
    prf: &'static str,
    salt: String,
}

#[derive(Serialize)]
struct Module<P> {
    function: &'static str,
    params: P,
    message: String,
}

#[derive(Serialize)]
struct CipherParams {
    iv: String,
}

#[derive(Serialize)]
struct Crypto {
    kdf: Module<KdfParams>,
    checksum: Module<Empty>,
    cipher: Module<CipherParams>,
}

#[derive(Serialize)]
struct Document {
    crypto: Crypto,
    description: String,
    pubkey: String,
    path: String,
    uuid: String,
    version: u32,
}

/// Deterministic 32 bytes bound to `seed`, the validator `index` and a `label`.
fn material(seed: &[u8], index: usize, label: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(b"keystore");
    hasher.update(label);
    hasher.update((index as u64).to_be_bytes());
    hasher.finalize().into()
}

/// Encrypt `secret`, returning `(checksum, ciphertext)`.
fn encrypt(
    secret: &[u8],
    password: &[u8],
    salt: &[u8],
    iv: &[u8; 16],
    rounds: u32,
) -> ([u8; 32], Vec<u8>) {
    let mut key = Zeroizing::new([0u8; DKLEN]);
    pbkdf2_hmac::<Sha256>(password, salt, rounds, key.as_mut());

    let mut ciphertext = secret.to_vec();
    let mut cipher = Ctr128BE::<Aes128>::new(
        GenericArray::from_slice(&key[..16]),
        GenericArray::from_slice(iv),
    );
    cipher.apply_keystream(&mut ciphertext);

    let mut hasher = Sha256::new();
    hasher.update(&key[16..]);
    hasher.update(&ciphertext);
    (hasher.finalize().into(), ciphertext)
}

/// Render the keystore of `validator`, returning the document and its password.
fn render(
    seed: &[u8],
    validator: &Validator,
    rounds: u32,
) -> Result<(String, Zeroizing<String>), Error> {
    let salt = material(seed, validator.index, b"salt");
    let iv: [u8; 16] = material(seed, validator.index, b"iv")[..16]
        .try_into()
        .map_err(|_| Error::Derivation("invalid iv length".into()))?;
    let id: [u8; 16] = material(seed, validator.index, b"uuid")[..16]
        .try_into()
        .map_err(|_| Error::Derivation("invalid uuid length".into()))?;
    let password = Zeroizing::new(hex(&material(seed, validator.index, b"password")));

    let secret = Zeroizing::new(validator.secret.to_bytes());
    let (checksum, ciphertext) = encrypt(
        secret.as_ref(),
        password.as_bytes(),
        &salt,
        &iv,
        rounds,
    );

    let document = Document {
        crypto: Crypto {
            kdf: Module {
                function: "pbkdf2",
                params: KdfParams {
                    dklen: DKLEN,
                    c: rounds,
                    prf: "hmac-sha256",
                    salt: hex(&salt),
                },
                message: String::new(),
            },
            checksum: Module {
                function: "sha256",
                params: Empty {},
                message: hex(&checksum),
            },
            cipher: Module {
                function: "aes-128-ctr",
                params: CipherParams { iv: hex(&iv) },
                message: hex(&ciphertext),
            },
        },
        description: String::new(),
        pubkey: hex(&validator.public),
        path: validator.path(),
        uuid: uuid::Builder::from_random_bytes(id)
            .into_uuid()
            .hyphenated()
            .to_string(),
        version: VERSION,
    };
    Ok((serde_json::to_string_pretty(&document)?, password))
}

/// Write the keystores of `validators`, one directory per range in `ranges`.
pub fn write(
    seed: &[u8],
    validators: &[Validator],
    ranges: &[Range<usize>],
    rounds: u32,
    dir: &Path,
) -> Result<Vec<Keystore>, Error> {
    let mut keystores = Vec::with_capacity(ranges.len());
    for (index, range) in ranges.iter().enumerate() {
        let keystore_dir = dir.join(format!("node-{index}"));
        for sub in [KEYS_DIR, SECRETS_DIR, TEKU_KEYS_DIR, TEKU_SECRETS_DIR] {
            fs::create_dir_all(keystore_dir.join(sub))?;
        }

        let owned = validators
            .get(range.clone())
            .ok_or_else(|| Error::Partition(format!("range {range:?} exceeds validators")))?;
        let mut public_keys = Vec::with_capacity(owned.len());
        for validator in owned {
            let (document, password) = render(seed, validator, rounds)?;
            let public = format!("0x{}", hex(&validator.public));

            let voting = keystore_dir.join(KEYS_DIR).join(&public);
            fs::create_dir_all(&voting)?;
            fs::write(voting.join(VOTING_KEYSTORE), &document)?;
            fs::write(keystore_dir.join(SECRETS_DIR).join(&public), password.as_bytes())?;
            fs::write(
                keystore_dir
                    .join(TEKU_KEYS_DIR)
                    .join(format!("{public}.json")),
                &document,
            )?;
            fs::write(
                keystore_dir
                    .join(TEKU_SECRETS_DIR)
                    .join(format!("{public}.txt")),
                password.as_bytes(),
            )?;
            public_keys.push(public);
        }

        keystores.push(Keystore {
            index,
            dir: keystore_dir,
            validators: range.clone(),
            public_keys,
        });
    }
    Ok(keystores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use commonware_macros::test_traced;
    use commonware_utils::from_hex_formatted;
    use serde_json::Value;

    fn decrypt(document: &Value, password: &str) -> Vec<u8> {
        let crypto = &document["crypto"];
        let salt = from_hex_formatted(crypto["kdf"]["params"]["salt"].as_str().unwrap()).unwrap();
        let rounds = crypto["kdf"]["params"]["c"].as_u64().unwrap() as u32;
        let iv = from_hex_formatted(crypto["cipher"]["params"]["iv"].as_str().unwrap()).unwrap();
        let mut message = from_hex_formatted(crypto["cipher"]["message"].as_str().unwrap()).unwrap();

        let mut key = [0u8; DKLEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, rounds, &mut key);
        let mut hasher = Sha256::new();
        hasher.update(&key[16..]);
        hasher.update(&message);
        let checksum: [u8; 32] = hasher.finalize().into();
        assert_eq!(hex(&checksum), crypto["checksum"]["message"].as_str().unwrap());

        let mut cipher = Ctr128BE::<Aes128>::new(
            GenericArray::from_slice(&key[..16]),
            GenericArray::from_slice(&iv),
        );
        cipher.apply_keystream(&mut message);
        message
    }

    #[test_traced]
    fn test_eip2335_vector() {
        let secret = from_hex_formatted(
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        )
        .unwrap();
        let salt = from_hex_formatted(
            "d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3",
        )
        .unwrap();
        let iv: [u8; 16] = from_hex_formatted("264daa3f303d7259501c93d997d84fe6")
            .unwrap()
            .try_into()
            .unwrap();
        let (checksum, ciphertext) = encrypt(
            &secret,
            "testpassword\u{1F511}".as_bytes(),
            &salt,
            &iv,
            262144,
        );
        assert_eq!(
            hex(&checksum),
            "8a9f5d9912ed7e75ea794bc5a89bca5f193721d30868ade6f73043c6ea6febf1"
        );
        assert_eq!(
            hex(&ciphertext),
            "cee03fde2af33149775b7223e7845e4fb2c8ae1792e5f99fe9ecf474cc8c16ad"
        );
    }

    #[test_traced]
    fn test_write_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let seed = [3u8; 64];
        let validators = keys::derive(&seed, 5).unwrap();
        let ranges = keys::partition(5, 2, None).unwrap();
        let keystores = write(&seed, &validators, &ranges, 2, dir.path()).unwrap();

        assert_eq!(keystores.len(), 2);
        assert_eq!(keystores[0].validators, 0..3);
        assert_eq!(keystores[1].validators, 3..5);
        assert_eq!(keystores[1].public_keys.len(), 2);

        for keystore in &keystores {
            for (public, validator) in keystore
                .public_keys
                .iter()
                .zip(&validators[keystore.validators.clone()])
            {
                let voting = keystore.keys().join(public).join(VOTING_KEYSTORE);
                let teku = keystore.teku_keys().join(format!("{public}.json"));
                let document = fs::read_to_string(&voting).unwrap();
                assert_eq!(document, fs::read_to_string(&teku).unwrap());

                let password = fs::read_to_string(keystore.secrets().join(public)).unwrap();
                let teku_password = fs::read_to_string(
                    keystore.teku_secrets().join(format!("{public}.txt")),
                )
                .unwrap();
                assert_eq!(password, teku_password);

                let document: Value = serde_json::from_str(&document).unwrap();
                assert_eq!(document["version"], 4);
                assert_eq!(document["pubkey"].as_str().unwrap(), &public[2..]);
                assert_eq!(decrypt(&document, &password), validator.secret.to_bytes());
            }
        }
    }
}
