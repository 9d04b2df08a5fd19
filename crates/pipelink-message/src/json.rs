use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::message::PipeMessage;

/// A flat serde value carried as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Json<T> {
    fn from(value: T) -> Self {
        Json(value)
    }
}

impl<T> std::ops::Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> PipeMessage for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.0)?))
    }

    fn decode(bytes: Bytes) -> Result<Self> {
        Ok(Json(serde_json::from_slice(&bytes)?))
    }
}
