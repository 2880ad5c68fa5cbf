use std::io;

use crate::error::Error;

/// TOML-backed configuration, with dotted-path lookups
pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn lookup(&self, k: &str) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k.as_ref())?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k.as_ref())?
            .as_integer()
            .and_then(|i| usize::try_from(i).ok())
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k.as_ref())?.as_bool()
    }

    /// Set an entry by path, creating intermediate tables as needed
    ///
    /// Fails if a path component exists and is not a table.
    pub fn set<T: AsRef<str>, V: Into<toml::Value>>(&mut self, k: T, v: V) -> Result<(), Error> {
        let path = k.as_ref();
        let mut keys: Vec<&str> = path.split('.').collect();
        let last = keys.pop().unwrap_or(path);
        let mut table = match &mut self.value {
            toml::Value::Table(t) => t,
            _ => return Err(Error::Config("configuration root is not a table".to_owned())),
        };
        for key in keys {
            let entry = table
                .entry(key.to_owned())
                .or_insert(toml::Value::Table(toml::map::Map::new()));
            table = match entry {
                toml::Value::Table(t) => t,
                _ => return Err(Error::Config(format!("{key} in {path} is not a table"))),
            };
        }
        table.insert(last.to_owned(), v.into());
        Ok(())
    }

    /// Load configuration from input object. Previous values are replaced.
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        let table: toml::Table = toml::from_str(&s)
            .map_err(|e| Error::Config(format!("Load configuration failed: {e}")))?;
        self.value = toml::Value::Table(table);
        Ok(())
    }

    /// Number of worker threads: `num_threads`, where 0 means one per CPU
    pub fn num_workers(&self) -> usize {
        match self.get_usize("num_threads").unwrap_or(1) {
            0 => num_cpus::get(),
            n => n,
        }
    }
}
