use std::collections::{HashMap, HashSet};

pub(crate) use self::traits::*;

mod traits;

pub type FastHashSet<K> = HashSet<K, ahash::RandomState>;
pub type FastHashMap<K, V> = HashMap<K, V, ahash::RandomState>;
