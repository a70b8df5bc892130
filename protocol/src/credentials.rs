use {
    anyhow::{Error, bail, format_err},
    base64::{Engine, display::Base64Display, prelude::BASE64_STANDARD},
    rand::RngCore,
    serde::{Deserialize, Deserializer, Serialize, Serializer, de},
    std::{
        borrow::Cow,
        fmt::{self, Debug, Display},
        str::FromStr,
    },
};

/// Secret used by the client to authenticate against the object store.
///
/// Never compiled into the binary; it is supplied through the config file or the environment.
#[derive(Clone, Deserialize, Serialize)]
#[serde(try_from = "String")]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    #[inline]
    pub fn as_unmasked_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccessToken {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            bail!("access token cannot be empty");
        }
        if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
            bail!("access token contains invalid character {c:?}");
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for AccessToken {
    type Error = Error;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Debug for AccessToken {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken").finish()
    }
}

/// Length of the shared AES-256 key.
pub const LINK_KEY_LENGTH: usize = 32;

/// Symmetric secret shared by all clients of one link.
///
/// It encrypts every exchanged object and, base64 encoded, addresses the link's index,
/// so only holders of the key can find or overwrite it.
#[derive(Clone, PartialEq, Eq)]
pub struct LinkKey([u8; LINK_KEY_LENGTH]);

impl LinkKey {
    #[must_use]
    #[inline]
    pub fn generate() -> Self {
        let mut key = [0_u8; LINK_KEY_LENGTH];
        rand::rng().fill_bytes(&mut key);
        Self(key)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let array = <[u8; LINK_KEY_LENGTH]>::try_from(bytes).map_err(|_| {
            format_err!(
                "invalid link key length; got {}, expected {LINK_KEY_LENGTH}",
                bytes.len()
            )
        })?;
        Ok(Self(array))
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8; LINK_KEY_LENGTH] {
        &self.0
    }

    /// Standard base64 with padding, as used in index object keys and persisted link data.
    #[must_use]
    #[inline]
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    #[must_use]
    #[inline]
    pub fn display_unmasked(&self) -> impl Display + '_ {
        Base64Display::new(&self.0, &BASE64_STANDARD)
    }
}

impl FromStr for LinkKey {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64_STANDARD.decode(s.trim())?;
        Self::from_bytes(&bytes)
    }
}

impl<'de> Deserialize<'de> for LinkKey {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Serialize for LinkKey {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_base64().serialize(serializer)
    }
}

impl Debug for LinkKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkKey").finish()
    }
}

/// Locally persisted data of one named link.
///
/// A list of these is stored as a JSON array by the link manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CloudLinkData {
    /// The link key as a base64 string. Kept as a plain string so a corrupt key
    /// affects only its own link when loading.
    pub link_key: String,
    pub name: String,
}
