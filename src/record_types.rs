use std::cmp::Ordering;

/// A (key,value) pair, as emitted by map() and reduce().
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Record {
        Record {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Record) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Record) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.value.cmp(&other.value),
            o => o,
        }
    }
}

/// A (key,[value]) group; the unit handed to one reducer. The values keep the order in which
/// they were aggregated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyGroup {
    pub key: String,
    pub values: Vec<String>,
}

impl KeyGroup {
    pub fn new(key: String) -> KeyGroup {
        KeyGroup {
            key,
            values: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Emitter type used in the map phase; used to emit (key,value) pairs.
#[derive(Default)]
pub struct MEmitter {
    r: Vec<Record>,
}

impl MEmitter {
    pub fn new() -> MEmitter {
        MEmitter { r: Vec::new() }
    }

    pub fn emit<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        self.r.push(Record::new(key, val))
    }

    pub fn len(&self) -> usize {
        self.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.r
    }
}
