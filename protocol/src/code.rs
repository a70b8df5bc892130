use {
    anyhow::{Error, bail},
    rand::Rng,
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

/// Digits and uppercase latin letters without `O`, which is easy to mistake for `0`.
pub const CODE_ALPHABET: &[u8; 35] = b"0123456789ABCDEFGHIJKLMNPQRSTUVWXYZ";

pub const CODE_LENGTH: usize = 6;

/// Short human-transcribable code under which a link key is published for pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkCode(String);

impl LinkCode {
    #[must_use]
    #[inline]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..CODE_LENGTH)
            .filter_map(|_| CODE_ALPHABET.get(rng.random_range(0..CODE_ALPHABET.len())))
            .map(|&c| char::from(c))
            .collect();
        Self(code)
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for LinkCode {
    type Err = Error;

    /// Accepts codes typed in any case. A letter `O` is read as zero.
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code: String = s
            .trim()
            .chars()
            .map(|c| match c.to_ascii_uppercase() {
                'O' => '0',
                c => c,
            })
            .collect();
        if code.chars().count() != CODE_LENGTH {
            bail!(
                "invalid code length; got {}, expected {CODE_LENGTH}",
                code.chars().count()
            );
        }
        if let Some(c) = code
            .chars()
            .find(|&c| u8::try_from(c).map_or(true, |b| !CODE_ALPHABET.contains(&b)))
        {
            bail!("code contains invalid character `{c}`");
        }
        Ok(Self(code))
    }
}

impl TryFrom<String> for LinkCode {
    type Error = Error;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LinkCode> for String {
    #[inline]
    fn from(value: LinkCode) -> Self {
        value.0
    }
}

impl fmt::Display for LinkCode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_uses_alphabet() {
        for _ in 0..100 {
            let code = LinkCode::generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(code.as_str().bytes().all(|c| CODE_ALPHABET.contains(&c)));
            assert!(!code.as_str().contains('O'));
            assert_eq!(code.as_str().parse::<LinkCode>().unwrap(), code);
        }
    }

    #[test]
    fn alphabet_has_35_distinct_symbols() {
        let mut symbols = CODE_ALPHABET.to_vec();
        symbols.sort_unstable();
        symbols.dedup();
        assert_eq!(symbols.len(), 35);
    }

    #[test]
    fn parse_normalizes_case() {
        let code: LinkCode = "7f3k2q".parse().unwrap();
        assert_eq!(code.as_str(), "7F3K2Q");
        let code: LinkCode = " ab0o12 ".parse().unwrap();
        assert_eq!(code.as_str(), "AB0012");
    }

    #[test]
    fn parse_rejects_invalid_codes() {
        LinkCode::from_str("").unwrap_err();
        LinkCode::from_str("7F3K2").unwrap_err();
        LinkCode::from_str("7F3K2QQ").unwrap_err();
        LinkCode::from_str("7F3K2-").unwrap_err();
        LinkCode::from_str("7F3K2É").unwrap_err();
    }
}
