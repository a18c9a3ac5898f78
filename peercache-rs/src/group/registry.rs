use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::group::Group;
use crate::platform::Platform;

/// Keeps all groups of a node by name.
///
/// The registry is used to dispatch requests of clients and peers to the appropriate group. It
/// is kept in the [Platform](crate::platform::Platform) and can be obtained via
/// `platform.require::<Registry>()`.
///
/// # Example
///
/// ```
/// # use peercache::group::{Group, Registry};
/// let registry = Registry::new();
/// let group = Group::builder("scores")
///     .getter_fn(|key| Ok(key.as_bytes().to_vec()))
///     .build()
///     .unwrap();
///
/// registry.register(group);
/// assert_eq!(registry.find("scores").unwrap().name(), "scores");
/// assert_eq!(registry.find("unknown").is_none(), true);
/// ```
#[derive(Default)]
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers the given group.
    ///
    /// A group which was previously registered with the same name is replaced.
    pub fn register(&self, group: Arc<Group>) {
        let name = group.name().to_owned();
        let previous = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), group);

        if previous.is_some() {
            log::warn!("Group {} has been replaced by a new instance.", name);
        } else {
            log::info!("Group {} has been registered.", name);
        }
    }

    /// Returns the group with the given name.
    pub fn find(&self, name: &str) -> Option<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns all known groups sorted by their name.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        groups.sort_by(|left, right| left.name().cmp(right.name()));

        groups
    }

    /// Returns the names of all known groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        self.groups()
            .iter()
            .map(|group| group.name().to_owned())
            .collect()
    }
}

/// Creates and installs an empty **Registry** for the given platform.
///
/// Note that this is called by the [Builder](crate::builder::Builder) unless it is disabled.
pub fn install(platform: &Arc<Platform>) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    platform.register::<Registry>(registry.clone());

    registry
}

#[cfg(test)]
mod tests {
    use crate::group::{Group, Registry};
    use crate::testing::test_async;

    #[test]
    fn last_registration_wins() {
        test_async(async {
            let registry = Registry::new();
            registry.register(
                Group::builder("scores")
                    .getter_fn(|_| Ok(b"first".to_vec()))
                    .build()
                    .unwrap(),
            );
            registry.register(
                Group::builder("scores")
                    .getter_fn(|_| Ok(b"second".to_vec()))
                    .build()
                    .unwrap(),
            );
            registry.register(
                Group::builder("names")
                    .getter_fn(|_| Ok(Vec::new()))
                    .build()
                    .unwrap(),
            );

            let group = registry.find("scores").unwrap();
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "second");
            assert_eq!(registry.names(), vec!["names", "scores"]);
        });
    }
}
