pub mod conversations;
pub mod files;
pub mod projects;

use serde::{Deserialize, Deserializer};

/// Lets a PATCH body tell `"field": null` apart from a missing field.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
