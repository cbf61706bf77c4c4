//! Denylist and per-API cost tables parsed from configuration strings.

use std::collections::{HashMap, HashSet};

use appsearch_core_types::CallType;
use tracing::warn;

/// Blocks specific (package, database, call type) combinations.
///
/// Immutable once parsed; a configuration refresh builds a new table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Denylist {
    package_database: HashMap<(String, String), HashSet<CallType>>,
    package: HashMap<String, HashSet<CallType>>,
    database: HashMap<String, HashSet<CallType>>,
}

impl Denylist {
    /// Parses `pkg=<name>&db=<name>&apis=<api>,<api>` entries separated by `;`.
    ///
    /// Malformed entries are skipped; the rest of the table still applies.
    pub fn parse(raw: &str) -> Self {
        let mut denylist = Denylist::default();
        for entry in raw.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
            match parse_entry(entry) {
                Ok(parsed) => denylist.insert(parsed),
                Err(reason) => warn!(entry, reason, "skipping malformed denylist entry"),
            }
        }
        denylist
    }

    fn insert(&mut self, entry: DenylistEntry) {
        let target = match (entry.package, entry.database) {
            (Some(package), Some(database)) => self
                .package_database
                .entry((package, database))
                .or_default(),
            (Some(package), None) => self.package.entry(package).or_default(),
            (None, Some(database)) => self.database.entry(database).or_default(),
            (None, None) => return,
        };
        target.extend(entry.apis);
    }

    pub fn is_empty(&self) -> bool {
        self.package_database.is_empty() && self.package.is_empty() && self.database.is_empty()
    }

    /// Whether `call` from `package` against `database` must be rejected.
    ///
    /// Calls that do not target a database only match package-wide entries.
    pub fn is_denied(&self, package: &str, database: Option<&str>, call: CallType) -> bool {
        if self
            .package
            .get(package)
            .is_some_and(|apis| apis.contains(&call))
        {
            return true;
        }
        let Some(database) = database else {
            return false;
        };
        if self
            .database
            .get(database)
            .is_some_and(|apis| apis.contains(&call))
        {
            return true;
        }
        self.package_database
            .get(&(package.to_string(), database.to_string()))
            .is_some_and(|apis| apis.contains(&call))
    }
}

struct DenylistEntry {
    package: Option<String>,
    database: Option<String>,
    apis: HashSet<CallType>,
}

fn parse_entry(entry: &str) -> Result<DenylistEntry, &'static str> {
    let mut package = None;
    let mut database = None;
    let mut apis = None;
    for pair in entry.split('&') {
        let (key, value) = pair.split_once('=').ok_or("missing '=' in key/value pair")?;
        let value = value.trim();
        if value.is_empty() {
            return Err("empty value");
        }
        match key.trim() {
            "pkg" => package = Some(value.to_string()),
            "db" => database = Some(value.to_string()),
            "apis" => {
                let parsed: HashSet<CallType> = value
                    .split(',')
                    .filter_map(|name| match name.parse::<CallType>() {
                        Ok(call) => Some(call),
                        Err(err) => {
                            warn!(%err, "ignoring unknown api in denylist entry");
                            None
                        }
                    })
                    .collect();
                apis = Some(parsed);
            }
            _ => return Err("unknown key"),
        }
    }
    if package.is_none() && database.is_none() {
        return Err("entry names neither pkg nor db");
    }
    let apis = apis.ok_or("entry has no apis")?;
    if apis.is_empty() {
        return Err("entry has no recognised apis");
    }
    Ok(DenylistEntry {
        package,
        database,
        apis,
    })
}

/// Cost charged against the rate-limit budget for each call type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiCosts {
    costs: HashMap<CallType, u32>,
}

impl ApiCosts {
    pub const DEFAULT_COST: u32 = 1;

    /// Parses `api:cost` pairs separated by `;`. Bad pairs are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut costs = HashMap::new();
        for pair in raw.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
            let Some((name, cost)) = pair.split_once(':') else {
                warn!(pair, "skipping api cost without ':'");
                continue;
            };
            match (name.parse::<CallType>(), cost.trim().parse::<u32>()) {
                (Ok(call), Ok(cost)) => {
                    costs.insert(call, cost);
                }
                _ => warn!(pair, "skipping unparsable api cost"),
            }
        }
        Self { costs }
    }

    pub fn cost_of(&self, call: CallType) -> u32 {
        self.costs.get(&call).copied().unwrap_or(Self::DEFAULT_COST)
    }
}
