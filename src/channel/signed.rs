use core::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use super::{pack_state, ChannelDefinition, SignatureValidator, State};
use crate::{
    abiencode::types::{Address, Signature},
    asset::AssetDecimals,
    error::{Error, SignatureError},
    session_key::ChannelSessionKeyState,
    sig::{self, Signer},
};

/// A state signature as the contract expects it: one byte naming the
/// validator followed by the 65 byte ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSignature {
    pub validator: SignatureValidator,
    pub sig: Signature,
}

impl ChannelSignature {
    pub const LEN: usize = 1 + 65;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = self.validator.code();
        bytes[1..].copy_from_slice(&self.sig.0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != Self::LEN {
            return Err(SignatureError::Malformed(format!(
                "expected {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let validator = SignatureValidator::try_from(bytes[0])
            .map_err(|code| SignatureError::Malformed(format!("unknown validator {}", code)))?;
        let mut sig = Signature([0; 65]);
        sig.0.copy_from_slice(&bytes[1..]);
        Ok(ChannelSignature { validator, sig })
    }
}

impl fmt::Display for ChannelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for ChannelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for ChannelSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| SignatureError::Malformed(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for ChannelSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl State {
    /// Sign the packed state with `signer`.
    ///
    /// Does not attach the signature, see [State::set_user_sig] and
    /// [State::set_node_sig].
    pub fn sign<A, S>(
        &self,
        signer: &S,
        validator: SignatureValidator,
        assets: &A,
    ) -> Result<ChannelSignature, Error>
    where
        A: AssetDecimals + ?Sized,
        S: Signer + ?Sized,
    {
        let packed = pack_state(self, assets)?;
        let sig = signer.sign(&packed)?;
        debug!(state = %self.id(), version = self.version(), signer = %signer.address(), "signed state");
        Ok(ChannelSignature { validator, sig })
    }

    /// Recover the address that produced `sig` over this state.
    pub fn recover_signer<A>(&self, sig: &ChannelSignature, assets: &A) -> Result<Address, Error>
    where
        A: AssetDecimals + ?Sized,
    {
        let packed = pack_state(self, assets)?;
        Ok(sig::recover_signer(&packed, sig.sig)?)
    }

    pub fn set_user_sig(&mut self, sig: ChannelSignature) {
        self.user_sig = Some(sig);
    }

    pub fn set_node_sig(&mut self, sig: ChannelSignature) {
        self.node_sig = Some(sig);
    }

    /// Check the user signature: either by the wallet itself or by one of
    /// `session_keys`, which must be valid at `now` (unix seconds) and cover
    /// the state's asset. `definition` must approve the validator used.
    pub fn verify_user_sig<A>(
        &self,
        definition: &ChannelDefinition,
        assets: &A,
        session_keys: &[ChannelSessionKeyState],
        now: u64,
    ) -> Result<(), Error>
    where
        A: AssetDecimals + ?Sized,
    {
        let sig = self.user_sig.ok_or(SignatureError::Missing("user"))?;
        definition.check_approved(sig.validator)?;
        let recovered = self.recover_signer(&sig, assets)?;
        match sig.validator {
            SignatureValidator::Default if recovered == self.user_wallet => Ok(()),
            SignatureValidator::Default => Err(SignatureError::SignerMismatch {
                expected: self.user_wallet,
                recovered,
            }
            .into()),
            SignatureValidator::SessionKey => {
                let key = session_keys
                    .iter()
                    .find(|k| k.session_key == recovered && k.user_address == self.user_wallet)
                    .ok_or(SignatureError::UnauthorizedSessionKey(recovered))?;
                key.verify(now)?;
                if !key.covers_asset(&self.asset) {
                    return Err(SignatureError::UnauthorizedSessionKey(recovered).into());
                }
                Ok(())
            }
        }
    }

    /// The node always signs with its own key.
    pub fn verify_node_sig<A>(&self, node: Address, assets: &A) -> Result<(), Error>
    where
        A: AssetDecimals + ?Sized,
    {
        let sig = self.node_sig.ok_or(SignatureError::Missing("node"))?;
        if sig.validator != SignatureValidator::Default {
            return Err(SignatureError::UnapprovedValidator(sig.validator.code()).into());
        }
        let recovered = self.recover_signer(&sig, assets)?;
        if recovered != node {
            return Err(SignatureError::SignerMismatch {
                expected: node,
                recovered,
            }
            .into());
        }
        Ok(())
    }
}
