use {
    anyhow::{Context as _, Result},
    serde::{Serialize, de::DeserializeOwned},
};

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context("failed to serialize to json")
}

pub fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).context("failed to deserialize json")
}
