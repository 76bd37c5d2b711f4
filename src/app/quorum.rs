use std::collections::BTreeSet;

use tracing::trace;

use super::AppDefinition;
use crate::{
    abiencode::types::{Address, Hash, Signature},
    error::SignatureError,
    session_key::AppSessionKeyState,
    sig,
};

/// Participants whose signatures were found valid, and their total weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    pub signers: BTreeSet<Address>,
    pub weight: u64,
}

/// Recover every signature over `packed` and check the signers reach the
/// definition's quorum.
///
/// A signature by a session key counts for its user if the key is among
/// `session_keys`, covers the session and is valid at `now`. Every
/// participant counts once, the order of `sigs` does not matter.
pub fn verify_quorum(
    definition: &AppDefinition,
    app_session_id: &Hash,
    packed: &[u8],
    sigs: &[Signature],
    session_keys: &[AppSessionKeyState],
    now: u64,
) -> Result<Quorum, SignatureError> {
    let mut quorum = Quorum {
        signers: BTreeSet::new(),
        weight: 0,
    };

    for sig in sigs {
        let recovered = sig::recover_signer(packed, *sig)?;
        let participant = match definition.participant(&recovered) {
            Some(p) => p,
            None => {
                let key = session_keys
                    .iter()
                    .find(|k| {
                        k.session_key == recovered
                            && k.covers(&definition.application, app_session_id)
                    })
                    .ok_or(SignatureError::UnknownSigner(recovered))?;
                key.verify(now)?;
                trace!(key = %recovered, user = %key.user_address, "signed by session key");
                definition
                    .participant(&key.user_address)
                    .ok_or(SignatureError::UnknownSigner(key.user_address))?
            }
        };

        if !quorum.signers.insert(participant.wallet_address) {
            return Err(SignatureError::DuplicateSigner(participant.wallet_address));
        }
        quorum.weight += u64::from(participant.signature_weight);
    }

    if quorum.weight < u64::from(definition.quorum) {
        return Err(SignatureError::QuorumNotMet {
            weight: quorum.weight,
            quorum: u64::from(definition.quorum),
        });
    }
    Ok(quorum)
}
