//! Workload configuration file.
//!
//! The file is line oriented: the first whitespace-delimited token of each
//! line is a key, the remaining tokens are its fields.
//!
//! ```text
//! server 192.168.1.51 5001
//! server 192.168.1.52 5001
//! load 2000Mbps
//! num_reqs 10000
//! req_size_dist conf/DCTCP_CDF.txt
//! fanout 1 50
//! fanout 4 50
//! service 0 70
//! service 46 30
//! rate 0Mbps 20
//! rate 500Mbps 80
//! ```
//!
//! Loading reads the file twice. The first pass rejects unknown keys and
//! counts each key so that every table can be allocated at its final size.
//! The second pass extracts the fields into those tables.

use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    str::{FromStr, SplitAsciiWhitespace},
};

use log::{debug, info};

use crate::{distribution::WeightedTable, error::ConfigError};

/// Longest accepted server address, in bytes.
pub const MAX_ADDR_LEN: usize = 19;
/// Longest accepted request size distribution path, in bytes.
pub const MAX_PATH_LEN: usize = 79;

const UNIT_SUFFIX: &str = "Mbps";

const DEFAULT_FANOUT: u32 = 1;
const DEFAULT_DSCP: u32 = 0;
const DEFAULT_RATE_MBPS: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Server,
    Load,
    NumReqs,
    ReqSizeDist,
    Fanout,
    Service,
    Rate,
}

impl Key {
    pub fn as_str(&self) -> &'static str {
        match self {
            Key::Server => "server",
            Key::Load => "load",
            Key::NumReqs => "num_reqs",
            Key::ReqSizeDist => "req_size_dist",
            Key::Fanout => "fanout",
            Key::Service => "service",
            Key::Rate => "rate",
        }
    }
}

impl FromStr for Key {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(Key::Server),
            "load" => Ok(Key::Load),
            "num_reqs" => Ok(Key::NumReqs),
            "req_size_dist" => Ok(Key::ReqSizeDist),
            "fanout" => Ok(Key::Fanout),
            "service" => Ok(Key::Service),
            "rate" => Ok(Key::Rate),
            _ => Err(()),
        }
    }
}

/// Number of lines seen for each key during the counting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyCounts {
    pub server: usize,
    pub load: usize,
    pub num_reqs: usize,
    pub req_size_dist: usize,
    pub fanout: usize,
    pub service: usize,
    pub rate: usize,
}

impl KeyCounts {
    /// Counts every key in the file, failing on the first unknown one.
    pub fn scan(path: &Path) -> Result<KeyCounts, ConfigError> {
        let mut counts = KeyCounts::default();
        for_each_directive(path, |_, key, _| {
            counts.record(key);
            Ok(())
        })?;
        Ok(counts)
    }

    fn record(&mut self, key: Key) {
        let counter = match key {
            Key::Server => &mut self.server,
            Key::Load => &mut self.load,
            Key::NumReqs => &mut self.num_reqs,
            Key::ReqSizeDist => &mut self.req_size_dist,
            Key::Fanout => &mut self.fanout,
            Key::Service => &mut self.service,
            Key::Rate => &mut self.rate,
        };
        *counter += 1;
    }

    /// Checks the multiplicity of the mandatory keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server < 1 {
            return Err(ConfigError::MissingServer);
        }

        for (key, found) in [
            (Key::Load, self.load),
            (Key::NumReqs, self.num_reqs),
            (Key::ReqSizeDist, self.req_size_dist),
        ] {
            if found != 1 {
                return Err(ConfigError::Cardinality {
                    key: key.as_str(),
                    expected: 1,
                    found,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub addr: String,
    pub port: u16,
}

impl Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Tables sized from the counting pass, filled by the extraction pass.
struct Tables {
    servers: Vec<Server>,
    fanout: WeightedTable,
    service: WeightedTable,
    rate: WeightedTable,
}

impl Tables {
    // Optional distributions always get one slot for their default entry.
    fn allocate(counts: &KeyCounts) -> Result<Tables, ConfigError> {
        let mut servers = Vec::new();
        servers
            .try_reserve_exact(counts.server)
            .map_err(|source| ConfigError::Allocation {
                table: Key::Server.as_str(),
                source,
            })?;

        Ok(Tables {
            servers,
            fanout: WeightedTable::with_capacity(Key::Fanout.as_str(), counts.fanout.max(1))?,
            service: WeightedTable::with_capacity(Key::Service.as_str(), counts.service.max(1))?,
            rate: WeightedTable::with_capacity(Key::Rate.as_str(), counts.rate.max(1))?,
        })
    }
}

/// Parsed workload configuration.
///
/// Built once by [`WorkloadConfig::from_file`] and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadConfig {
    load_mbps: f64,
    request_total: u64,
    size_dist_file: PathBuf,
    servers: Vec<Server>,
    fanout: WeightedTable,
    service: WeightedTable,
    rate: WeightedTable,
}

impl WorkloadConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<WorkloadConfig, ConfigError> {
        let path = path.as_ref();
        info!("Reading configuration file {}", path.display());

        let counts = KeyCounts::scan(path)?;
        debug!("Configuration keys: {:?}", counts);
        counts.validate()?;

        let tables = Tables::allocate(&counts)?;
        WorkloadConfig::extract(path, tables)
    }

    fn extract(path: &Path, mut tables: Tables) -> Result<WorkloadConfig, ConfigError> {
        let mut load_mbps = None;
        let mut request_total = None;
        let mut size_dist_file = None;

        for_each_directive(path, |line, key, text| {
            let mut fields = Fields::new(line, key, text);
            match key {
                Key::Server => {
                    let addr = fields.bounded("address", MAX_ADDR_LEN)?;
                    let port: u16 = fields.parse("port")?;
                    let server = Server { addr, port };
                    info!("Server[{}]: {}", tables.servers.len(), server);
                    tables.servers.push(server);
                }
                Key::Load => {
                    let load: f64 = fields.parse_mbps("load")?;
                    if !load.is_finite() || load <= 0.0 {
                        return Err(fields.malformed(format!("load must be positive, got {load}")));
                    }
                    info!("Network load: {:.2} Mbps", load);
                    set_once(Key::Load, &mut load_mbps, load)?;
                }
                Key::NumReqs => {
                    let total: u64 = fields.parse("request count")?;
                    if total == 0 {
                        return Err(fields.malformed("request count must be positive"));
                    }
                    info!("Number of requests: {}", total);
                    set_once(Key::NumReqs, &mut request_total, total)?;
                }
                Key::ReqSizeDist => {
                    let file = fields.bounded("path", MAX_PATH_LEN)?;
                    info!("Request size distribution: {}", file);
                    set_once(Key::ReqSizeDist, &mut size_dist_file, PathBuf::from(file))?;
                }
                Key::Fanout => {
                    let size: u32 = fields.parse("size")?;
                    let weight: u32 = fields.parse("weight")?;
                    info!("Fanout: {}, weight: {}", size, weight);
                    tables.fanout.push(size, weight);
                }
                Key::Service => {
                    let dscp: u32 = fields.parse("dscp")?;
                    let weight: u32 = fields.parse("weight")?;
                    info!("Service DSCP: {}, weight: {}", dscp, weight);
                    tables.service.push(dscp, weight);
                }
                Key::Rate => {
                    let rate: u32 = fields.parse_mbps("rate")?;
                    let weight: u32 = fields.parse("weight")?;
                    info!("Rate: {}Mbps, weight: {}", rate, weight);
                    tables.rate.push(rate, weight);
                }
            }
            Ok(())
        })?;

        // The file may have changed since it was counted.
        if tables.servers.is_empty() {
            return Err(ConfigError::MissingServer);
        }

        Ok(WorkloadConfig {
            load_mbps: required(Key::Load, load_mbps)?,
            request_total: required(Key::NumReqs, request_total)?,
            size_dist_file: required(Key::ReqSizeDist, size_dist_file)?,
            servers: tables.servers,
            fanout: with_default(Key::Fanout, tables.fanout, DEFAULT_FANOUT)?,
            service: with_default(Key::Service, tables.service, DEFAULT_DSCP)?,
            rate: with_default(Key::Rate, tables.rate, DEFAULT_RATE_MBPS)?,
        })
    }

    /// Target aggregate offered load.
    pub fn load_mbps(&self) -> f64 {
        self.load_mbps
    }

    /// Total number of requests to issue.
    pub fn request_total(&self) -> u64 {
        self.request_total
    }

    /// Request size distribution file. Not opened here.
    pub fn size_dist_file(&self) -> &Path {
        &self.size_dist_file
    }

    /// Servers in file order.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Number of servers each request fans out to.
    pub fn fanout(&self) -> &WeightedTable {
        &self.fanout
    }

    /// DSCP value of each flow.
    pub fn service(&self) -> &WeightedTable {
        &self.service
    }

    /// Per-flow sending rate cap in Mbps, 0 meaning unlimited.
    pub fn rate(&self) -> &WeightedTable {
        &self.rate
    }

    /// Releases every table. Scalars are left untouched.
    pub fn teardown(&mut self) {
        self.servers = Vec::new();
        self.fanout.release();
        self.service.release();
        self.rate.release();
    }
}

fn required<T>(key: Key, value: Option<T>) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Cardinality {
        key: key.as_str(),
        expected: 1,
        found: 0,
    })
}

// Pass 2 may see a file that changed after it was counted.
fn set_once<T>(key: Key, slot: &mut Option<T>, value: T) -> Result<(), ConfigError> {
    if slot.is_some() {
        return Err(ConfigError::Cardinality {
            key: key.as_str(),
            expected: 1,
            found: 2,
        });
    }
    *slot = Some(value);
    Ok(())
}

fn with_default(key: Key, table: WeightedTable, value: u32) -> Result<WeightedTable, ConfigError> {
    if table.is_empty() {
        let table = table.or_default(value);
        for entry in table.entries() {
            info!("{} (default): {}", key.as_str(), entry);
        }
        return Ok(table);
    }

    if table.weight_total() == 0 {
        return Err(ConfigError::ZeroWeight { key: key.as_str() });
    }
    Ok(table)
}

/// Calls `handle` with the line number, key and text of every non-blank line.
fn for_each_directive<F>(path: &Path, mut handle: F) -> Result<(), ConfigError>
where
    F: FnMut(usize, Key, &str) -> Result<(), ConfigError>,
{
    let file = File::open(path).map_err(|source| ConfigError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    for (index, bytes) in BufReader::new(file).split(b'\n').enumerate() {
        let bytes = bytes.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let number = index + 1;
        let line = String::from_utf8(bytes)
            .map_err(|source| ConfigError::InvalidUtf8 { line: number, source })?;

        let Some(token) = line.split_ascii_whitespace().next() else {
            continue;
        };
        let key = token.parse::<Key>().map_err(|_| ConfigError::UnknownKey {
            line: number,
            key: token.to_string(),
        })?;

        handle(number, key, &line)?;
    }

    Ok(())
}

/// Field tokens of one line, past its key. Tokens left over are ignored.
struct Fields<'a> {
    line: usize,
    key: Key,
    tokens: SplitAsciiWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(line: usize, key: Key, text: &'a str) -> Fields<'a> {
        let mut tokens = text.split_ascii_whitespace();
        tokens.next();
        Fields { line, key, tokens }
    }

    fn malformed(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::MalformedField {
            line: self.line,
            key: self.key.as_str(),
            reason: reason.into(),
        }
    }

    fn token(&mut self, name: &str) -> Result<&'a str, ConfigError> {
        self.tokens
            .next()
            .ok_or_else(|| self.malformed(format!("missing {name}")))
    }

    fn parse<T>(&mut self, name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let token = self.token(name)?;
        self.parse_token(name, token)
    }

    /// Parses `<number>Mbps`, or `<number> Mbps` with the unit as its own token.
    fn parse_mbps<T>(&mut self, name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let token = self.token(name)?;
        if let Some(number) = token.strip_suffix(UNIT_SUFFIX) {
            return self.parse_token(name, number);
        }

        if self.tokens.clone().next() != Some(UNIT_SUFFIX) {
            return Err(self.malformed(format!(
                "{name} `{token}` should be followed by `{UNIT_SUFFIX}`"
            )));
        }
        self.tokens.next();
        self.parse_token(name, token)
    }

    fn parse_token<T>(&self, name: &str, token: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        token
            .parse()
            .map_err(|err| self.malformed(format!("invalid {name} `{token}`: {err}")))
    }

    fn bounded(&mut self, name: &str, max_len: usize) -> Result<String, ConfigError> {
        let token = self.token(name)?;
        if token.len() > max_len {
            return Err(self.malformed(format!(
                "{name} is {} bytes long, at most {max_len} allowed",
                token.len()
            )));
        }
        Ok(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const BASE: &str = "server 10.0.0.1 5001\nload 100Mbps\nnum_reqs 1000\nreq_size_dist conf/DCTCP_CDF.txt\n";

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn load(content: &str) -> Result<WorkloadConfig, ConfigError> {
        let file = write_config(content);
        WorkloadConfig::from_file(file.path())
    }

    #[test]
    fn key_round_trips_through_str() {
        for key in [
            Key::Server,
            Key::Load,
            Key::NumReqs,
            Key::ReqSizeDist,
            Key::Fanout,
            Key::Service,
            Key::Rate,
        ] {
            assert_eq!(key.as_str().parse::<Key>(), Ok(key));
        }
        assert!("Server".parse::<Key>().is_err());
    }

    #[test]
    fn scan_counts_every_key() {
        let file = write_config(&format!(
            "{BASE}server 10.0.0.2 5002\nfanout 1 50\nfanout 2 50\nrate 10Mbps 1\n"
        ));
        let counts = KeyCounts::scan(file.path()).unwrap();
        assert_eq!(
            counts,
            KeyCounts {
                server: 2,
                load: 1,
                num_reqs: 1,
                req_size_dist: 1,
                fanout: 2,
                service: 0,
                rate: 1,
            }
        );
        assert!(counts.validate().is_ok());
    }

    #[test]
    fn validate_reports_duplicate_num_reqs() {
        let counts = KeyCounts {
            server: 1,
            load: 1,
            num_reqs: 2,
            req_size_dist: 1,
            ..KeyCounts::default()
        };
        assert!(matches!(
            counts.validate(),
            Err(ConfigError::Cardinality {
                key: "num_reqs",
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn validate_requires_a_server() {
        let counts = KeyCounts {
            load: 1,
            num_reqs: 1,
            req_size_dist: 1,
            ..KeyCounts::default()
        };
        assert!(matches!(counts.validate(), Err(ConfigError::MissingServer)));
    }

    #[test]
    fn allocate_reserves_default_slots() {
        let counts = KeyCounts {
            server: 3,
            fanout: 4,
            ..KeyCounts::default()
        };
        let tables = Tables::allocate(&counts).unwrap();
        assert!(tables.servers.capacity() >= 3);
        assert!(tables.fanout.capacity() >= 4);
        assert!(tables.service.capacity() >= 1);
        assert!(tables.rate.capacity() >= 1);
    }

    #[test]
    fn allocate_reports_oversized_table() {
        let counts = KeyCounts {
            server: 1,
            rate: usize::MAX,
            ..KeyCounts::default()
        };
        assert!(matches!(
            Tables::allocate(&counts),
            Err(ConfigError::Allocation { table: "rate", .. })
        ));
    }

    #[test]
    fn parses_scalars() {
        let config = load(BASE).unwrap();
        assert_eq!(config.load_mbps(), 100.0);
        assert_eq!(config.request_total(), 1000);
        assert_eq!(config.size_dist_file(), Path::new("conf/DCTCP_CDF.txt"));
        assert_eq!(
            config.servers(),
            &[Server {
                addr: "10.0.0.1".to_string(),
                port: 5001
            }]
        );
    }

    #[test]
    fn fractional_load() {
        let config = load(&BASE.replace("100Mbps", "12.5Mbps")).unwrap();
        assert_eq!(config.load_mbps(), 12.5);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let config = load(&format!("\n   \n{BASE}\n\t\n")).unwrap();
        assert_eq!(config.servers().len(), 1);
    }

    #[test]
    fn trailing_tokens_are_ignored() {
        let config = load(&format!("{BASE}service 46 30 extra tokens\n")).unwrap();
        assert_eq!(config.service().entries()[0].value, 46);
        assert_eq!(config.service().weight_total(), 30);
    }

    #[test]
    fn load_requires_unit_suffix() {
        let err = load(&BASE.replace("100Mbps", "100")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedField {
                line: 2,
                key: "load",
                ..
            }
        ));
    }

    #[test]
    fn load_must_be_positive() {
        let err = load(&BASE.replace("100Mbps", "0Mbps")).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedField { key: "load", .. }));
    }

    #[test]
    fn num_reqs_must_be_positive() {
        let err = load(&BASE.replace("num_reqs 1000", "num_reqs 0")).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedField { key: "num_reqs", .. }));
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let err = load(&BASE.replace("5001", "http")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedField {
                line: 1,
                key: "server",
                ..
            }
        ));
    }

    #[test]
    fn missing_weight_is_rejected() {
        let err = load(&format!("{BASE}fanout 4\n")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedField {
                line: 5,
                key: "fanout",
                ..
            }
        ));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let err = load(&format!("{BASE}service 0 -5\n")).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedField { key: "service", .. }));
    }

    #[test]
    fn long_address_is_rejected() {
        let addr = "a".repeat(MAX_ADDR_LEN + 1);
        let err = load(&BASE.replace("10.0.0.1", &addr)).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedField { key: "server", .. }));

        let addr = "a".repeat(MAX_ADDR_LEN);
        let config = load(&BASE.replace("10.0.0.1", &addr)).unwrap();
        assert_eq!(config.servers()[0].addr, addr);
    }

    #[test]
    fn long_path_is_rejected() {
        let path = "p".repeat(MAX_PATH_LEN + 1);
        let err = load(&BASE.replace("conf/DCTCP_CDF.txt", &path)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedField {
                key: "req_size_dist",
                ..
            }
        ));
    }

    #[test]
    fn all_zero_weights_are_rejected() {
        let err = load(&format!("{BASE}rate 10Mbps 0\nrate 20Mbps 0\n")).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWeight { key: "rate" }));
    }

    #[test]
    fn defaults_are_independent() {
        let config = load(&format!("{BASE}service 46 10\n")).unwrap();
        assert_eq!(config.fanout().entries()[0].value, DEFAULT_FANOUT);
        assert_eq!(config.fanout().weight_total(), 100);
        assert_eq!(config.service().len(), 1);
        assert_eq!(config.service().entries()[0].value, 46);
        assert_eq!(config.service().weight_total(), 10);
        assert_eq!(config.rate().entries()[0].value, DEFAULT_RATE_MBPS);
        assert_eq!(config.rate().weight_total(), 100);
    }

    #[test]
    fn teardown_releases_tables_and_keeps_scalars() {
        let mut config = load(BASE).unwrap();
        config.teardown();
        assert!(config.servers().is_empty());
        assert!(config.fanout().is_empty());
        assert!(config.service().is_empty());
        assert!(config.rate().is_empty());
        assert_eq!(config.request_total(), 1000);
    }

    #[test]
    fn unit_may_be_a_separate_token() {
        let config = load(&format!(
            "{}rate 100 Mbps 7\n",
            BASE.replace("100Mbps", "100 Mbps")
        ))
        .unwrap();
        assert_eq!(config.load_mbps(), 100.0);
        assert_eq!(config.rate().entries()[0].value, 100);
        assert_eq!(config.rate().weight_total(), 7);
    }

    #[test]
    fn wrong_unit_token_is_rejected() {
        let err = load(&BASE.replace("100Mbps", "100 Gbps")).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedField { line: 2, key: "load", .. }));
    }

    #[test]
    fn invalid_utf8_names_the_line() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"server 10.0.0.1 5001\nload 100Mbps\nnum_reqs 1000\nfanout 1 50\n")
            .unwrap();
        file.write_all(b"req_size_dist caf\xe9.txt\n").unwrap();
        file.flush().unwrap();
        let err = WorkloadConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUtf8 { line: 5, .. }));
    }

    #[test]
    fn extract_rejects_scalar_added_after_counting() {
        let file = write_config(&format!("{BASE}num_reqs 5\n"));
        let tables = Tables::allocate(&KeyCounts::scan(file.path()).unwrap()).unwrap();
        let err = WorkloadConfig::extract(file.path(), tables).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Cardinality {
                key: "num_reqs",
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn extract_rejects_server_removed_after_counting() {
        let file = write_config("load 1Mbps\nnum_reqs 1\nreq_size_dist a.txt\n");
        let tables = Tables::allocate(&KeyCounts::scan(file.path()).unwrap()).unwrap();
        let err = WorkloadConfig::extract(file.path(), tables).unwrap_err();
        assert!(matches!(err, ConfigError::MissingServer));
    }

    #[test]
    fn teardown_on_empty_model() {
        let mut config = WorkloadConfig::default();
        config.teardown();
        config.teardown();
        assert!(config.servers().is_empty());
    }
}
