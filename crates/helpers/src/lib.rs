use std::hash::BuildHasherDefault;

pub type IndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<ahash::AHasher>>;
pub type IndexSet<V> = indexmap::IndexSet<V, BuildHasherDefault<ahash::AHasher>>;

pub trait Config: Sized {
    fn config(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}

impl<T> Config for T {}

/// Lowercase a name for case-insensitive property/column matching,
/// optionally folding `under_score` separators away so that `user_name`
/// matches `userName`.
pub fn canonical_name(name: &str, fold_underscores: bool) -> String {
    if fold_underscores {
        name.chars()
            .filter(|&c| c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect()
    } else {
        name.to_ascii_lowercase()
    }
}
