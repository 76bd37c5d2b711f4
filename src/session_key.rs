//! Delegation of signing rights from a wallet to a session key.
//!
//! The wallet signs a record naming the key, what it may be used for and
//! until when. Channel session keys sign channel states for the listed
//! assets, app session keys sign app session updates for the listed
//! applications or sessions.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{
    abiencode::{
        self,
        types::{Address, Hash, Signature},
    },
    error::{Error, SignatureError},
    sig::{self, Signer},
};

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSessionKeyState {
    pub user_address: Address,
    pub session_key: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub version: u64,
    pub assets: Vec<String>,
    /// Unix seconds.
    #[serde_as(as = "DisplayFromStr")]
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_sig: Option<Signature>,
}

#[derive(Serialize)]
struct ChannelSessionKeyPreimage<'a> {
    user_address: Address,
    session_key: Address,
    version: u64,
    assets: &'a [String],
    expires_at: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionKeyState {
    pub user_address: Address,
    pub session_key: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub version: u64,
    pub application_ids: Vec<String>,
    pub app_session_ids: Vec<Hash>,
    /// Unix seconds.
    #[serde_as(as = "DisplayFromStr")]
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_sig: Option<Signature>,
}

#[derive(Serialize)]
struct AppSessionKeyPreimage<'a> {
    user_address: Address,
    session_key: Address,
    version: u64,
    application_ids: &'a [String],
    app_session_ids: &'a [Hash],
    expires_at: u64,
}

fn sign_delegation<S>(user: Address, packed: &[u8], signer: &S) -> Result<Signature, Error>
where
    S: Signer + ?Sized,
{
    if signer.address() != user {
        return Err(SignatureError::SignerMismatch {
            expected: user,
            recovered: signer.address(),
        }
        .into());
    }
    Ok(signer.sign(packed)?)
}

fn verify_delegation(
    user: Address,
    key: Address,
    expires_at: u64,
    sig: Option<Signature>,
    packed: Result<Vec<u8>, abiencode::Error>,
    now: u64,
) -> Result<(), SignatureError> {
    let sig = sig.ok_or(SignatureError::Missing("session key"))?;
    let packed = packed.map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let recovered = sig::recover_signer(&packed, sig)?;
    if recovered != user {
        return Err(SignatureError::SignerMismatch {
            expected: user,
            recovered,
        });
    }
    if now >= expires_at {
        return Err(SignatureError::SessionKeyExpired { key, expires_at });
    }
    Ok(())
}

impl ChannelSessionKeyState {
    /// The abi encoding the wallet signs.
    pub fn pack(&self) -> Result<Vec<u8>, abiencode::Error> {
        abiencode::to_vec(&ChannelSessionKeyPreimage {
            user_address: self.user_address,
            session_key: self.session_key,
            version: self.version,
            assets: &self.assets,
            expires_at: self.expires_at,
        })
    }

    /// Sign as `user_address`, fails if `signer` is someone else.
    pub fn sign<S>(&mut self, signer: &S) -> Result<(), Error>
    where
        S: Signer + ?Sized,
    {
        let packed = self.pack().map_err(|e| SignatureError::Malformed(e.to_string()))?;
        self.user_sig = Some(sign_delegation(self.user_address, &packed, signer)?);
        Ok(())
    }

    /// Signed by the user and not expired at `now` (unix seconds).
    pub fn verify(&self, now: u64) -> Result<(), SignatureError> {
        verify_delegation(
            self.user_address,
            self.session_key,
            self.expires_at,
            self.user_sig,
            self.pack(),
            now,
        )
    }

    pub fn covers_asset(&self, asset: &str) -> bool {
        self.assets.iter().any(|a| a.eq_ignore_ascii_case(asset))
    }
}

impl AppSessionKeyState {
    /// The abi encoding the wallet signs.
    pub fn pack(&self) -> Result<Vec<u8>, abiencode::Error> {
        abiencode::to_vec(&AppSessionKeyPreimage {
            user_address: self.user_address,
            session_key: self.session_key,
            version: self.version,
            application_ids: &self.application_ids,
            app_session_ids: &self.app_session_ids,
            expires_at: self.expires_at,
        })
    }

    /// Sign as `user_address`, fails if `signer` is someone else.
    pub fn sign<S>(&mut self, signer: &S) -> Result<(), Error>
    where
        S: Signer + ?Sized,
    {
        let packed = self.pack().map_err(|e| SignatureError::Malformed(e.to_string()))?;
        self.user_sig = Some(sign_delegation(self.user_address, &packed, signer)?);
        Ok(())
    }

    /// Signed by the user and not expired at `now` (unix seconds).
    pub fn verify(&self, now: u64) -> Result<(), SignatureError> {
        verify_delegation(
            self.user_address,
            self.session_key,
            self.expires_at,
            self.user_sig,
            self.pack(),
            now,
        )
    }

    /// Whether the key may sign for the session `app_session_id` of
    /// `application`.
    pub fn covers(&self, application: &str, app_session_id: &Hash) -> bool {
        self.application_ids.iter().any(|a| a == application)
            || self.app_session_ids.contains(app_session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::LocalSigner;
    use rand::{rngs::StdRng, SeedableRng};

    fn channel_key(user: &LocalSigner, key: Address) -> ChannelSessionKeyState {
        ChannelSessionKeyState {
            user_address: user.address(),
            session_key: key,
            version: 1,
            assets: vec!["usdc".into()],
            expires_at: 1_000,
            user_sig: None,
        }
    }

    #[test]
    fn channel_key_sign_and_verify() {
        let mut rng = StdRng::seed_from_u64(0);
        let user = LocalSigner::new(&mut rng);
        let key = LocalSigner::new(&mut rng);

        let mut state = channel_key(&user, key.address());
        assert_eq!(state.verify(0), Err(SignatureError::Missing("session key")));

        state.sign(&user).unwrap();
        state.verify(999).unwrap();
        assert!(state.covers_asset("USDC"));
        assert!(!state.covers_asset("eth"));
        assert_eq!(
            state.verify(1_000),
            Err(SignatureError::SessionKeyExpired {
                key: key.address(),
                expires_at: 1_000
            })
        );
    }

    #[test]
    fn channel_key_tampering_is_detected() {
        let mut rng = StdRng::seed_from_u64(1);
        let user = LocalSigner::new(&mut rng);
        let key = LocalSigner::new(&mut rng);

        let mut state = channel_key(&user, key.address());
        state.sign(&user).unwrap();
        state.assets.push("eth".into());
        assert!(matches!(
            state.verify(0),
            Err(SignatureError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn only_the_user_can_sign() {
        let mut rng = StdRng::seed_from_u64(2);
        let user = LocalSigner::new(&mut rng);
        let key = LocalSigner::new(&mut rng);

        let mut state = channel_key(&user, key.address());
        let err = state.sign(&key).unwrap_err();
        assert!(matches!(
            err,
            Error::Signature(SignatureError::SignerMismatch { .. })
        ));
        assert!(state.user_sig.is_none());
    }

    #[test]
    fn app_key_scope() {
        let mut rng = StdRng::seed_from_u64(3);
        let user = LocalSigner::new(&mut rng);
        let session: Hash = rand::Rng::gen(&mut rng);

        let mut state = AppSessionKeyState {
            user_address: user.address(),
            session_key: Address([0x42; 20]),
            version: 3,
            application_ids: vec!["chess".into()],
            app_session_ids: vec![session],
            expires_at: 50,
            user_sig: None,
        };
        state.sign(&user).unwrap();
        state.verify(49).unwrap();

        assert!(state.covers("chess", &Hash::ZERO));
        assert!(state.covers("poker", &session));
        assert!(!state.covers("poker", &Hash::ZERO));
    }

    #[test]
    fn wire_format() {
        let state = ChannelSessionKeyState {
            user_address: Address([0x11; 20]),
            session_key: Address([0x22; 20]),
            version: 2,
            assets: vec!["usdc".into()],
            expires_at: 1_700_000_000,
            user_sig: None,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["version"], "2");
        assert_eq!(json["expires_at"], "1700000000");
        assert!(json.get("user_sig").is_none());
        let back: ChannelSessionKeyState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
