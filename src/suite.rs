use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;

pub type Placeholders = HashMap<String, String>;

const BUILTIN_SUITE: &str = include_str!("../suites/default.json");

// Placeholders only open a path segment; `:` elsewhere (ports, query values) is literal.
static PATH_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/:([A-Za-z_][A-Za-z0-9_]*)").expect("path param pattern compiles"));

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("reading suite {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing suite {origin}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("suite {origin} defines no endpoints")]
    Empty { origin: String },
    #[error("endpoint `{name}` accepts no status codes")]
    EmptyExpectation { name: String },
    #[error("endpoint `{name}` has a path that does not start with `/`: {path}")]
    InvalidPath { name: String, path: String },
    #[error("endpoint `{name}` has a request body that is not a JSON object")]
    InvalidBody { name: String },
    #[error("no value for placeholder `:{placeholder}` in endpoint `{name}`")]
    MissingPlaceholder { name: String, placeholder: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Unsupported(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Unsupported(raw) => raw,
        }
    }

    /// `None` for methods the runner refuses to send.
    pub fn to_http(&self) -> Option<reqwest::Method> {
        match self {
            Method::Get => Some(reqwest::Method::GET),
            Method::Post => Some(reqwest::Method::POST),
            Method::Put => Some(reqwest::Method::PUT),
            Method::Delete => Some(reqwest::Method::DELETE),
            Method::Unsupported(_) => None,
        }
    }

    pub fn sends_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl From<String> for Method {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            _ => Method::Unsupported(raw),
        }
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthClass {
    #[default]
    None,
    User,
    Admin,
}

impl fmt::Display for AuthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthClass::None => "none",
            AuthClass::User => "user",
            AuthClass::Admin => "admin",
        })
    }
}

/// Status codes a descriptor accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExpectedStatus {
    Exactly(u16),
    AnyOf(BTreeSet<u16>),
    /// Any status strictly lower than the bound.
    Below { below: u16 },
}

impl ExpectedStatus {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            ExpectedStatus::Exactly(expected) => status == *expected,
            ExpectedStatus::AnyOf(set) => set.contains(&status),
            ExpectedStatus::Below { below } => status < *below,
        }
    }

    fn is_satisfiable(&self) -> bool {
        match self {
            ExpectedStatus::Exactly(_) => true,
            ExpectedStatus::AnyOf(set) => !set.is_empty(),
            ExpectedStatus::Below { below } => *below > 100,
        }
    }
}

impl Default for ExpectedStatus {
    fn default() -> Self {
        ExpectedStatus::Below { below: 500 }
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedStatus::Exactly(code) => write!(f, "{code}"),
            ExpectedStatus::AnyOf(set) => {
                let codes = set.iter().map(u16::to_string).collect::<Vec<_>>();
                write!(f, "one of [{}]", codes.join(", "))
            }
            ExpectedStatus::Below { below } => write!(f, "below {below}"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExpected {
    Single(u16),
    Many(Vec<u16>),
    Bound { below: u16 },
}

impl From<RawExpected> for ExpectedStatus {
    fn from(raw: RawExpected) -> Self {
        match raw {
            RawExpected::Single(code) => ExpectedStatus::Exactly(code),
            RawExpected::Many(codes) => ExpectedStatus::AnyOf(codes.into_iter().collect()),
            RawExpected::Bound { below } => ExpectedStatus::Below { below },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    name: String,
    #[serde(default)]
    group: Option<String>,
    method: Method,
    #[serde(alias = "url")]
    path: String,
    #[serde(default, alias = "auth_type")]
    auth: Option<AuthClass>,
    #[serde(default)]
    auth_required: bool,
    #[serde(default, alias = "data", alias = "request_body")]
    body: Option<Value>,
    #[serde(default, alias = "expected_status")]
    expected: Option<RawExpected>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSuite {
    Document { endpoints: Vec<RawEndpoint> },
    List(Vec<RawEndpoint>),
    Catalogue(RawCatalogue),
    Wrapped { vitawin_api_endpoints: RawCatalogue },
}

/// Endpoint catalogue keyed by group, then by endpoint name. A group whose value
/// is itself an endpoint stands for a single endpoint named after the group.
#[derive(Debug, Deserialize)]
struct RawCatalogue {
    endpoints: Map<String, Value>,
}

impl RawCatalogue {
    fn into_endpoints(self) -> Result<Vec<RawEndpoint>, serde_json::Error> {
        let mut endpoints = Vec::new();
        for (group, entry) in self.endpoints {
            if is_endpoint_entry(&entry) {
                endpoints.push(catalogue_endpoint(&group, &group, entry)?);
                continue;
            }
            let Value::Object(members) = entry else {
                return Err(serde::de::Error::custom(format!(
                    "catalogue group `{group}` is not an object"
                )));
            };
            for (name, endpoint) in members {
                endpoints.push(catalogue_endpoint(&group, &name, endpoint)?);
            }
        }
        Ok(endpoints)
    }
}

fn is_endpoint_entry(entry: &Value) -> bool {
    entry
        .as_object()
        .is_some_and(|fields| fields.contains_key("url") || fields.contains_key("path"))
}

fn catalogue_endpoint(
    group: &str,
    name: &str,
    entry: Value,
) -> Result<RawEndpoint, serde_json::Error> {
    let Value::Object(mut fields) = entry else {
        return Err(serde::de::Error::custom(format!(
            "catalogue endpoint `{group}/{name}` is not an object"
        )));
    };
    fields
        .entry("name")
        .or_insert_with(|| Value::String(name.to_string()));
    fields
        .entry("group")
        .or_insert_with(|| Value::String(group.to_string()));
    serde_json::from_value(Value::Object(fields))
}

/// One HTTP call to verify.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub method: Method,
    pub path_template: String,
    pub auth: AuthClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub expected: ExpectedStatus,
}

impl EndpointDescriptor {
    fn from_raw(raw: RawEndpoint) -> Result<Self, SuiteError> {
        let expected = raw.expected.map(ExpectedStatus::from).unwrap_or_default();
        if !expected.is_satisfiable() {
            return Err(SuiteError::EmptyExpectation { name: raw.name });
        }
        if !raw.path.starts_with('/') {
            return Err(SuiteError::InvalidPath {
                name: raw.name,
                path: raw.path,
            });
        }
        if matches!(&raw.body, Some(body) if !body.is_object()) {
            return Err(SuiteError::InvalidBody { name: raw.name });
        }

        let auth = match (raw.auth, raw.auth_required) {
            (Some(class), _) => class,
            (None, true) => AuthClass::User,
            (None, false) => AuthClass::None,
        };

        Ok(Self {
            name: raw.name,
            group: raw.group,
            method: raw.method,
            path_template: raw.path,
            auth,
            body: raw.body,
            expected,
        })
    }

    /// Names of the `:name` placeholders in the path, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        PATH_PARAM
            .captures_iter(self.path_part())
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Substitutes placeholders in the path; the query string is sent as written.
    pub fn render_path(&self, values: &Placeholders) -> Result<String, SuiteError> {
        let query = &self.path_template[self.path_part().len()..];
        let mut missing = None;
        let rendered = PATH_PARAM.replace_all(self.path_part(), |caps: &Captures<'_>| {
            let key = &caps[1];
            match values.get(key) {
                Some(value) => format!("/{value}"),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(placeholder) => Err(SuiteError::MissingPlaceholder {
                name: self.name.clone(),
                placeholder,
            }),
            None => Ok(format!("{rendered}{query}")),
        }
    }

    fn path_part(&self) -> &str {
        self.path_template
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Suite {
    endpoints: Vec<EndpointDescriptor>,
}

impl Suite {
    pub fn builtin() -> Result<Self, SuiteError> {
        Self::from_json(BUILTIN_SUITE, "<builtin>")
    }

    pub async fn load(path: &Path) -> Result<Self, SuiteError> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|source| SuiteError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&raw, &path.display().to_string())
    }

    pub fn from_json(contents: &str, origin: &str) -> Result<Self, SuiteError> {
        let raw: RawSuite = serde_json::from_str(contents).map_err(|source| SuiteError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        let raw_endpoints = match raw {
            RawSuite::Document { endpoints } | RawSuite::List(endpoints) => endpoints,
            RawSuite::Catalogue(catalogue)
            | RawSuite::Wrapped {
                vitawin_api_endpoints: catalogue,
            } => catalogue
                .into_endpoints()
                .map_err(|source| SuiteError::Parse {
                    origin: origin.to_string(),
                    source,
                })?,
        };
        if raw_endpoints.is_empty() {
            return Err(SuiteError::Empty {
                origin: origin.to_string(),
            });
        }

        let endpoints = raw_endpoints
            .into_iter()
            .map(EndpointDescriptor::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { endpoints })
    }

    pub fn from_endpoints(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self { endpoints }
    }

    /// Keeps only descriptors whose name contains `needle` (case-insensitive).
    pub fn retain_matching(&mut self, needle: &str) {
        let needle = needle.to_lowercase();
        self.endpoints
            .retain(|endpoint| endpoint.name.to_lowercase().contains(&needle));
    }

    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
