//! Validate a BIP-39 mnemonic and convert it into a seed.

use crate::Error;
use alloy_signer_local::coins_bip39::{English, Mnemonic};
use zeroize::Zeroizing;

/// Length of a derived seed.
pub const SEED_LENGTH: usize = 64;

/// Collapse the whitespace between the words of `mnemonic`.
pub fn normalize(mnemonic: &str) -> Zeroizing<String> {
    Zeroizing::new(mnemonic.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Derive the 64-byte seed of `mnemonic` (empty passphrase).
///
/// Fails unless every word is in the English word list and the checksum matches.
pub fn seed(mnemonic: &str) -> Result<Zeroizing<[u8; SEED_LENGTH]>, Error> {
    let phrase = normalize(mnemonic);
    let mnemonic = Mnemonic::<English>::new_from_phrase(phrase.as_str())
        .map_err(|err| Error::InvalidMnemonic(err.to_string()))?;
    let derived = mnemonic
        .to_seed(None)
        .map_err(|err| Error::InvalidMnemonic(err.to_string()))?;

    let mut seed = Zeroizing::new([0u8; SEED_LENGTH]);
    seed.copy_from_slice(&derived[..]);
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_utils::hex;
    use test_case::test_case;

    const VALID: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test_traced]
    fn test_bip39_vector() {
        let seed = seed(VALID).unwrap();
        assert_eq!(
            hex(seed.as_ref()),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
        );
    }

    #[test_traced]
    fn test_whitespace_normalized() {
        let a = seed(VALID).unwrap();
        let b = seed("  abandon abandon abandon abandon abandon abandon\n abandon abandon abandon abandon abandon  about ").unwrap();
        assert_eq!(a.as_ref(), b.as_ref());
    }

    #[test_case("" ; "empty")]
    #[test_case("abandon abandon about" ; "word count")]
    #[test_case("Abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about" ; "uppercase")]
    #[test_case("zzz zzz zzz zzz zzz zzz zzz zzz zzz zzz zzz zzz" ; "unknown words")]
    #[test_case("abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon" ; "bad checksum")]
    fn test_rejects_invalid(mnemonic: &str) {
        assert!(matches!(seed(mnemonic), Err(Error::InvalidMnemonic(_))));
    }
}
