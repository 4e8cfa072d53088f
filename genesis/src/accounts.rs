//! Derive prefunded execution accounts (BIP-32, `m/44'/60'/0'/0/i`).

use crate::{mnemonic, Error};
use alloy_primitives::Address;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder};

/// An execution account funded at genesis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
}

/// Derive the first `count` accounts of `mnemonic`.
pub fn derive(mnemonic: &str, count: usize) -> Result<Vec<Account>, Error> {
    let phrase = mnemonic::normalize(mnemonic);
    (0..count)
        .map(|index| {
            let index = u32::try_from(index)
                .map_err(|_| Error::Derivation(format!("account {index} out of range")))?;
            let signer = MnemonicBuilder::<English>::default()
                .phrase(phrase.as_str())
                .index(index)
                .and_then(|builder| builder.build())
                .map_err(|err| Error::Derivation(err.to_string()))?;
            Ok(Account {
                address: signer.address(),
            })
        })
        .collect()
}
