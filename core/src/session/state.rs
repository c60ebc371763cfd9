use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ArcadeError, Result};

/// Typed round state owned by one game.
///
/// The session store only sees the encoded bytes; each game declares its own
/// state struct and opts in with an empty impl:
///
/// ```
/// use arcade_core::session::SessionState;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct WordChain {
///     last_word: String,
///     turns: u32,
/// }
///
/// impl SessionState for WordChain {}
///
/// let bytes = WordChain { last_word: "apple".into(), turns: 1 }.encode().unwrap();
/// let back = WordChain::decode(&bytes).unwrap();
/// assert_eq!(back.turns, 1);
/// ```
pub trait SessionState: Serialize + DeserializeOwned + Sized {
    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ArcadeError::validation(format!("session state could not be encoded: {e}"))
        })
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ArcadeError::validation(format!("session state payload is malformed: {e}"))
        })
    }
}

impl SessionState for serde_json::Value {}
