//! Consistency gating of region assignments.
//!
//! Up to four independent signals name a record's state. A record is placed
//! only when every enabled signal resolves and all of them name the same
//! state. There is no majority vote.

use std::fmt;
use std::str::FromStr;

use crate::codes::CodeTables;
use crate::error::{PipelineError, Result};
use crate::model::PlantRecord;
use crate::polygon_index::PolygonIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Check {
    /// Coordinate inside a state polygon.
    StatePolygon,
    /// MaStR state catalog code.
    StateCode,
    /// Leading two digits of the municipality key. Corroborates the state only.
    DistrictKey,
    /// Coordinate inside a district polygon; also supplies the district label.
    DistrictPolygon,
}

impl Check {
    pub const ALL: [Check; 4] = [
        Check::StatePolygon,
        Check::StateCode,
        Check::DistrictKey,
        Check::DistrictPolygon,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Check::StatePolygon => "state-polygon",
            Check::StateCode => "state-code",
            Check::DistrictKey => "district-key",
            Check::DistrictPolygon => "district-polygon",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Check {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Check::ALL
            .into_iter()
            .find(|check| check.name() == s)
            .ok_or_else(|| PipelineError::UnknownOption {
                kind: "check",
                value: s.to_string(),
            })
    }
}

/// The checks enabled for a run, iterated in [`Check::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckSet(u8);

impl Default for CheckSet {
    fn default() -> Self {
        Self::all()
    }
}

impl CheckSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self::from_checks(Check::ALL)
    }

    /// The N-check variants: 2 = state polygon + state code, 3 adds the
    /// district key, 4 adds the district polygon.
    pub fn preset(n: usize) -> Option<Self> {
        match n {
            2..=4 => Some(Self::from_checks(Check::ALL.into_iter().take(n))),
            _ => None,
        }
    }

    pub fn from_checks(checks: impl IntoIterator<Item = Check>) -> Self {
        checks.into_iter().fold(Self::empty(), |set, check| set.with(check))
    }

    pub fn with(self, check: Check) -> Self {
        Self(self.0 | check.bit())
    }

    pub fn contains(&self, check: Check) -> bool {
        self.0 & check.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Check> {
        let set = *self;
        Check::ALL.into_iter().filter(move |check| set.contains(*check))
    }
}

impl fmt::Display for CheckSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(|c| c.name()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Where an accepted record belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub state: String,
    /// Present only when the district polygon check is enabled.
    pub district: Option<String>,
    /// A polygon check had to break a tie between overlapping polygons.
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    /// The check produced no state.
    Missing { check: Check },
    /// Two checks named different states.
    Disagreement { first: Check, second: Check },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Missing { check } => write!(f, "missing:{}", check),
            RejectReason::Disagreement { first, second } => {
                write!(f, "disagreement:{}/{}", first, second)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept(Placement),
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept(_))
    }
}

/// Evaluates the enabled checks for one record against shared reference data.
#[derive(Debug, Clone, Copy)]
pub struct ConsistencyChecker<'a> {
    checks: CheckSet,
    states: Option<&'a PolygonIndex>,
    districts: Option<&'a PolygonIndex>,
    codes: &'a CodeTables,
}

impl<'a> ConsistencyChecker<'a> {
    pub fn new(
        checks: CheckSet,
        states: Option<&'a PolygonIndex>,
        districts: Option<&'a PolygonIndex>,
        codes: &'a CodeTables,
    ) -> Result<Self> {
        if checks.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one check must be enabled".to_string(),
            ));
        }
        if checks.contains(Check::StatePolygon) && states.is_none() {
            return Err(PipelineError::InvalidConfig(
                "state polygon check enabled without state boundaries".to_string(),
            ));
        }
        if checks.contains(Check::DistrictPolygon) && districts.is_none() {
            return Err(PipelineError::InvalidConfig(
                "district polygon check enabled without district boundaries".to_string(),
            ));
        }

        Ok(Self {
            checks,
            states,
            districts,
            codes,
        })
    }

    pub fn checks(&self) -> CheckSet {
        self.checks
    }

    pub fn evaluate(&self, record: &PlantRecord) -> Verdict {
        let mut agreed: Option<(Check, &str)> = None;
        let mut district = None;
        let mut ambiguous = false;

        for check in self.checks.iter() {
            let state = match check {
                Check::StatePolygon => {
                    let location = self
                        .states
                        .zip(record.coordinate)
                        .map(|(index, point)| index.query(point));
                    ambiguous |= location.is_some_and(|l| l.is_ambiguous());
                    location
                        .and_then(|l| l.label())
                        .map(|label| label.state.as_str())
                }
                Check::StateCode => record
                    .state_code
                    .as_deref()
                    .and_then(|code| self.codes.state_for_code(code)),
                Check::DistrictKey => record
                    .district_prefix()
                    .and_then(|prefix| self.codes.state_for_district_prefix(prefix)),
                Check::DistrictPolygon => {
                    let location = self
                        .districts
                        .zip(record.coordinate)
                        .map(|(index, point)| index.query(point));
                    ambiguous |= location.is_some_and(|l| l.is_ambiguous());
                    let label = location.and_then(|l| l.label());
                    district = label.and_then(|l| l.district.as_deref());
                    label.map(|l| l.state.as_str())
                }
            };

            let Some(state) = state.map(str::trim) else {
                return Verdict::Reject(RejectReason::Missing { check });
            };

            match agreed {
                None => agreed = Some((check, state)),
                Some((_, previous)) if previous == state => {}
                Some((first, _)) => {
                    return Verdict::Reject(RejectReason::Disagreement {
                        first,
                        second: check,
                    })
                }
            }
        }

        match agreed {
            Some((_, state)) => Verdict::Accept(Placement {
                state: state.to_string(),
                district: district.map(|d| d.trim().to_string()),
                ambiguous,
            }),
            // An empty check set is refused in `new`.
            None => Verdict::Reject(RejectReason::Missing {
                check: Check::StatePolygon,
            }),
        }
    }
}
