//! Derive validator keys (EIP-2333) and split them between participant pairs.

use crate::Error;
use blst::min_pk::SecretKey;
use sha2::{Digest, Sha256};
use std::ops::Range;

/// Purpose level of EIP-2334 validator paths.
const PURPOSE: u32 = 12381;

/// Coin type of EIP-2334 validator paths.
const COIN_TYPE: u32 = 3600;

/// Prefix of BLS withdrawal credentials.
pub const BLS_WITHDRAWAL_PREFIX: u8 = 0x00;

/// A validator derived from the network mnemonic.
pub struct Validator {
    pub index: usize,
    pub secret: SecretKey,
    pub public: [u8; 48],
    pub withdrawal_credentials: [u8; 32],
}

impl Validator {
    /// EIP-2334 path of the signing key.
    pub fn path(&self) -> String {
        format!("m/{PURPOSE}/{COIN_TYPE}/{}/0/0", self.index)
    }
}

fn child(parent: &SecretKey, index: u32) -> SecretKey {
    parent.derive_child_eip2333(index)
}

/// Derive the first `count` validators of `seed`.
///
/// The withdrawal key of validator `i` lives at `m/12381/3600/i/0` and the
/// signing key at `m/12381/3600/i/0/0`.
pub fn derive(seed: &[u8], count: usize) -> Result<Vec<Validator>, Error> {
    let master = SecretKey::derive_master_eip2333(seed)
        .map_err(|err| Error::Derivation(format!("{err:?}")))?;
    let account = child(&child(&master, PURPOSE), COIN_TYPE);

    let mut validators = Vec::with_capacity(count);
    for index in 0..count {
        let position = u32::try_from(index)
            .map_err(|_| Error::Derivation(format!("index {index} out of range")))?;
        let withdrawal = child(&child(&account, position), 0);
        let signing = child(&withdrawal, 0);

        let mut withdrawal_credentials: [u8; 32] =
            Sha256::digest(withdrawal.sk_to_pk().compress()).into();
        withdrawal_credentials[0] = BLS_WITHDRAWAL_PREFIX;

        validators.push(Validator {
            index,
            public: signing.sk_to_pk().compress(),
            secret: signing,
            withdrawal_credentials,
        });
    }
    Ok(validators)
}

/// Split `count` keys into one contiguous range per pair.
///
/// Without an explicit mapping keys are spread evenly, with lower pair indexes
/// taking the remainder.
pub fn partition(
    count: usize,
    pairs: usize,
    explicit: Option<&[usize]>,
) -> Result<Vec<Range<usize>>, Error> {
    if pairs == 0 {
        return Err(Error::Partition("no pairs to assign keys to".into()));
    }
    let sizes = match explicit {
        Some(sizes) => {
            if sizes.len() != pairs {
                return Err(Error::Partition(format!(
                    "expected {pairs} key counts, found {}",
                    sizes.len()
                )));
            }
            if let Some(index) = sizes.iter().position(|size| *size == 0) {
                return Err(Error::Partition(format!("pair {index} owns no keys")));
            }
            let total: usize = sizes.iter().sum();
            if total != count {
                return Err(Error::Partition(format!(
                    "key counts sum to {total}, expected {count}"
                )));
            }
            sizes.to_vec()
        }
        None => {
            if count < pairs {
                return Err(Error::Partition(format!(
                    "{count} keys cannot cover {pairs} pairs"
                )));
            }
            let base = count / pairs;
            let remainder = count % pairs;
            (0..pairs)
                .map(|index| base + usize::from(index < remainder))
                .collect()
        }
    };

    let mut start = 0;
    Ok(sizes
        .into_iter()
        .map(|size| {
            let range = start..start + size;
            start += size;
            range
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_utils::{from_hex_formatted, hex};
    use test_case::test_case;

    #[test_traced]
    fn test_eip2333_vector() {
        let seed = from_hex_formatted("c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04").unwrap();
        let master = SecretKey::derive_master_eip2333(&seed).unwrap();
        assert_eq!(
            hex(&master.to_bytes()),
            "0d7359d57963ab8fbbde1852dcf553fedbc31f464d80ee7d40ae683122b45070"
        );
        assert_eq!(
            hex(&child(&master, 0).to_bytes()),
            "2d18bd6c14e6d15bf8b5085c9b74f3daae3b03cc2014770a599d8c1539e50f8e"
        );
    }

    #[test_traced]
    fn test_derive_deterministic() {
        let seed = [7u8; 64];
        let a = derive(&seed, 4).unwrap();
        let b = derive(&seed, 4).unwrap();
        assert_eq!(a.len(), 4);
        for (a, b) in a.iter().zip(b.iter()) {
            assert_eq!(a.public, b.public);
            assert_eq!(a.secret.to_bytes(), b.secret.to_bytes());
            assert_eq!(a.withdrawal_credentials, b.withdrawal_credentials);
            assert_eq!(a.withdrawal_credentials[0], BLS_WITHDRAWAL_PREFIX);
        }

        // Deriving more keys extends the sequence without changing the prefix
        let c = derive(&seed, 6).unwrap();
        assert_eq!(a[3].public, c[3].public);
        assert_ne!(c[4].public, c[5].public);
        assert_eq!(c[5].path(), "m/12381/3600/5/0/0");
    }

    #[test_case(100, 1, &[100] ; "single pair")]
    #[test_case(10, 3, &[4, 3, 3] ; "remainder to first")]
    #[test_case(3, 3, &[1, 1, 1] ; "one each")]
    fn test_even_partition(count: usize, pairs: usize, expected: &[usize]) {
        let ranges = partition(count, pairs, None).unwrap();
        let sizes: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        assert_eq!(sizes, expected);

        // Ranges are disjoint, non-empty and cover every key
        let mut next = 0;
        for range in ranges {
            assert!(!range.is_empty());
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, count);
    }

    #[test_traced]
    fn test_explicit_partition() {
        let ranges = partition(10, 2, Some(&[7, 3])).unwrap();
        assert_eq!(ranges, vec![0..7, 7..10]);
    }

    #[test_case(10, 2, Some(&[10, 0][..]) ; "empty pair")]
    #[test_case(10, 2, Some(&[4, 4][..]) ; "short sum")]
    #[test_case(10, 3, Some(&[5, 5][..]) ; "wrong length")]
    #[test_case(2, 3, None ; "too few keys")]
    fn test_invalid_partition(count: usize, pairs: usize, explicit: Option<&[usize]>) {
        assert!(matches!(
            partition(count, pairs, explicit),
            Err(Error::Partition(_))
        ));
    }
}
