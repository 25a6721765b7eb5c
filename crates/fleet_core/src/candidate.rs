use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

pub type CandidateId = u64;

/// Natural key of a candidate host: the canonical text form of its address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostKey(String);

impl HostKey {
    pub fn from_addr(addr: IpAddr) -> Self {
        Self(addr.to_string())
    }

    /// Wraps a key reported by a collaborator. Addresses are re-canonicalized
    /// so that results echo back onto the key they were requested with.
    pub fn from_reported(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<IpAddr>() {
            Ok(addr) => Self::from_addr(addr),
            Err(_) => Self(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    /// Reference to an SSH key already registered with the backend.
    KeyId(u64),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::KeyId(id) => f.debug_tuple("KeyId").field(id).finish(),
        }
    }
}

/// Attribute learned while probing a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveredAttribute {
    Hostname(String),
    OperatingSystem(String),
    Other { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub address: IpAddr,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub description: Option<String>,
    /// Columns the sheet schema does not know about, keyed by lowercase header.
    pub extra: BTreeMap<String, String>,
}

impl HostSpec {
    pub fn key(&self) -> HostKey {
        HostKey::from_addr(self.address)
    }

    /// Folds probe findings into the host. Discovered values win over sheet
    /// values since they describe what the host actually reported.
    pub fn merge_discovered<I>(&mut self, discovered: I)
    where
        I: IntoIterator<Item = DiscoveredAttribute>,
    {
        for attribute in discovered {
            match attribute {
                DiscoveredAttribute::Hostname(name) if !name.trim().is_empty() => {
                    self.hostname = Some(name.trim().to_string());
                }
                DiscoveredAttribute::OperatingSystem(os) if !os.trim().is_empty() => {
                    self.os = Some(os.trim().to_string());
                }
                DiscoveredAttribute::Other { key, value } => {
                    self.extra.insert(key.to_ascii_lowercase(), value);
                }
                DiscoveredAttribute::Hostname(_) | DiscoveredAttribute::OperatingSystem(_) => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeStatus {
    #[default]
    Untested,
    Testing,
    Success,
    Failed,
}

impl ProbeStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, ProbeStatus::Success | ProbeStatus::Failed)
    }

    fn can_become(self, next: ProbeStatus) -> bool {
        matches!(
            (self, next),
            (_, ProbeStatus::Untested)
                | (ProbeStatus::Untested, ProbeStatus::Testing)
                | (ProbeStatus::Testing, ProbeStatus::Success)
                | (ProbeStatus::Testing, ProbeStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("candidate {id}: illegal probe transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub id: CandidateId,
    pub from: ProbeStatus,
    pub to: ProbeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub id: CandidateId,
    /// Spreadsheet row the record came from (header is row 1).
    pub row_number: usize,
    pub host: HostSpec,
    status: ProbeStatus,
    message: Option<String>,
    detail: Option<String>,
}

impl CandidateRecord {
    pub fn new(id: CandidateId, row_number: usize, host: HostSpec) -> Self {
        Self {
            id,
            row_number,
            host,
            status: ProbeStatus::Untested,
            message: None,
            detail: None,
        }
    }

    pub fn key(&self) -> HostKey {
        self.host.key()
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Raw diagnostic text from the collaborator, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn reset(&mut self) {
        self.status = ProbeStatus::Untested;
        self.message = None;
        self.detail = None;
    }

    pub fn begin_testing(&mut self) -> Result<(), TransitionError> {
        self.transition(ProbeStatus::Testing)?;
        self.message = None;
        self.detail = None;
        Ok(())
    }

    pub fn succeed(&mut self, message: Option<String>) -> Result<(), TransitionError> {
        self.transition(ProbeStatus::Success)?;
        self.message = message;
        Ok(())
    }

    pub fn fail(
        &mut self,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> Result<(), TransitionError> {
        self.transition(ProbeStatus::Failed)?;
        self.message = Some(message.into());
        self.detail = detail;
        Ok(())
    }

    /// Fails an untested record, passing through `Testing` on the way.
    pub fn reject(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.begin_testing()?;
        self.fail(message, None)
    }

    /// Puts back a status captured earlier, used when a run is abandoned.
    pub(crate) fn restore(&mut self, status: ProbeStatus, message: Option<String>, detail: Option<String>) {
        self.status = status;
        self.message = message;
        self.detail = detail;
    }

    fn transition(&mut self, next: ProbeStatus) -> Result<(), TransitionError> {
        if !self.status.can_become(next) {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("candidate {id} is {status:?}, only successfully probed hosts can be committed")]
pub struct NotVerified {
    pub id: CandidateId,
    pub status: ProbeStatus,
}

/// A candidate that passed every pipeline stage. Only obtainable from a
/// `Success` record, so commit payloads never carry unresolved state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedHost {
    id: CandidateId,
    host: HostSpec,
}

impl VerifiedHost {
    pub fn candidate_id(&self) -> CandidateId {
        self.id
    }

    pub fn host(&self) -> &HostSpec {
        &self.host
    }

    pub fn into_host(self) -> HostSpec {
        self.host
    }
}

impl TryFrom<CandidateRecord> for VerifiedHost {
    type Error = NotVerified;

    fn try_from(record: CandidateRecord) -> Result<Self, Self::Error> {
        if record.status != ProbeStatus::Success {
            return Err(NotVerified {
                id: record.id,
                status: record.status,
            });
        }
        Ok(Self {
            id: record.id,
            host: record.host,
        })
    }
}
