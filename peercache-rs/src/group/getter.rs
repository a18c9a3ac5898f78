/// Loads the value of a key from the underlying data source.
///
/// A getter is invoked by a [Group](crate::group::Group) once a key is neither present in its
/// cache nor provided by the peer which owns the key. It may be invoked concurrently for
/// different keys, but never concurrently for the same key within one group.
///
/// Any synchronous closure of the form `Fn(&str) -> anyhow::Result<Vec<u8>>` can be used as
/// getter directly.
///
/// # Example
///
/// ```
/// # use peercache::group::Getter;
/// struct Database;
///
/// #[async_trait::async_trait]
/// impl Getter for Database {
///     async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
///         match key {
///             "Tom" => Ok(b"630".to_vec()),
///             _ => Err(anyhow::anyhow!("{} not exist", key)),
///         }
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Getter: Send + Sync {
    /// Loads the value for the given key.
    ///
    /// An error is handed to all callers which waited for this key. It is neither cached nor
    /// retried.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

#[async_trait::async_trait]
impl<F> Getter for F
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self(key)
    }
}
