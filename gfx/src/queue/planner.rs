use std::borrow::Cow;

use smallvec::SmallVec;

use super::QueueFlags;
use crate::physical::HardwareCandidate;
use crate::util::FastHashSet;

/// How a queue family for a role is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilySearch {
    /// A family with all `required` flags and none of the `forbidden` ones.
    /// If there is none, each of the `fallbacks` is tried in order with
    /// nothing forbidden.
    Capabilities {
        required: QueueFlags,
        forbidden: QueueFlags,
        fallbacks: SmallVec<[QueueFlags; 2]>,
    },
    /// The first family which can present to the target surface.
    Presentation,
}

/// An abstract queue usage with a desired number of queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRole {
    pub name: Cow<'static, str>,
    pub search: FamilySearch,
    pub count: u32,
}

impl QueueRole {
    pub fn new(name: impl Into<Cow<'static, str>>, required: QueueFlags) -> Self {
        Self {
            name: name.into(),
            search: FamilySearch::Capabilities {
                required,
                forbidden: QueueFlags::empty(),
                fallbacks: SmallVec::new(),
            },
            count: 1,
        }
    }

    /// Queues which can do both graphics and compute work.
    pub fn graphics_compute(count: u32) -> Self {
        Self::new("graphics_compute", QueueFlags::GRAPHICS | QueueFlags::COMPUTE).with_count(count)
    }

    /// Async compute queues, preferably on a family without graphics.
    pub fn compute(count: u32) -> Self {
        Self::new("compute", QueueFlags::COMPUTE)
            .forbid(QueueFlags::GRAPHICS)
            .or_fallback(QueueFlags::COMPUTE)
            .with_count(count)
    }

    /// Transfer queues, preferably on a dedicated transfer family.
    ///
    /// Graphics and compute families support transfer operations even
    /// if they don't report it, so they are used as fallbacks.
    pub fn transfer(count: u32) -> Self {
        Self::new("transfer", QueueFlags::TRANSFER)
            .forbid(QueueFlags::GRAPHICS | QueueFlags::COMPUTE)
            .or_fallback(QueueFlags::GRAPHICS)
            .or_fallback(QueueFlags::COMPUTE)
            .with_count(count)
    }

    /// Queues which can present to the target surface.
    pub fn presentation(count: u32) -> Self {
        Self {
            name: Cow::Borrowed("presentation"),
            search: FamilySearch::Presentation,
            count,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn forbid(mut self, flags: QueueFlags) -> Self {
        if let FamilySearch::Capabilities { forbidden, .. } = &mut self.search {
            *forbidden |= flags;
        }
        self
    }

    pub fn or_fallback(mut self, flags: QueueFlags) -> Self {
        if let FamilySearch::Capabilities { fallbacks, .. } = &mut self.search {
            fallbacks.push(flags);
        }
        self
    }

    fn validate(&self) -> Result<(), QueuePlanError> {
        let reason = match &self.search {
            FamilySearch::Capabilities { required, .. } if required.is_empty() => {
                "required flags are empty"
            }
            FamilySearch::Capabilities {
                required,
                forbidden,
                ..
            } if required.intersects(*forbidden) => "flags are both required and forbidden",
            FamilySearch::Capabilities { fallbacks, .. } if fallbacks.iter().any(|f| f.is_empty()) => {
                "fallback flags are empty"
            }
            _ => return Ok(()),
        };

        Err(QueuePlanError::InvalidRole {
            role: self.name.clone(),
            reason,
        })
    }
}

/// A role resolved to a concrete queue family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRequest {
    pub role: Cow<'static, str>,
    pub family: u32,
    pub count: u32,
}

/// Resolves each role to a queue family of the candidate.
///
/// Requests are returned in the same order as roles.
pub fn plan_queues(
    candidate: &HardwareCandidate,
    roles: &[QueueRole],
) -> Result<Vec<QueueRequest>, QueuePlanError> {
    let mut names = FastHashSet::default();
    roles
        .iter()
        .map(|role| -> Result<QueueRequest, QueuePlanError> {
            role.validate()?;
            if !names.insert(role.name.as_ref()) {
                return Err(QueuePlanError::InvalidRole {
                    role: role.name.clone(),
                    reason: "role name is not unique",
                });
            }

            let family = match &role.search {
                FamilySearch::Capabilities {
                    required,
                    forbidden,
                    fallbacks,
                } => candidate.find_family(*required, *forbidden).or_else(|| {
                    fallbacks
                        .iter()
                        .find_map(|flags| candidate.find_family(*flags, QueueFlags::empty()))
                }),
                FamilySearch::Presentation => candidate.find_presentation_family(),
            };

            let family = family.ok_or_else(|| QueuePlanError::QueueFamilyNotFound {
                role: role.name.clone(),
            })?;

            tracing::debug!(role = %role.name, family, count = role.count, "planned queue role");

            Ok(QueueRequest {
                role: role.name.clone(),
                family,
                count: role.count,
            })
        })
        .collect()
}

/// Error that can occur when planning queues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueuePlanError {
    #[error("invalid queue role `{role}`: {reason}")]
    InvalidRole {
        role: Cow<'static, str>,
        reason: &'static str,
    },
    #[error("no queue family found for role `{role}`")]
    QueueFamilyNotFound { role: Cow<'static, str> },
    #[error("role `{role}` requested queue family {family} which does not exist")]
    UnknownFamilyIndex { role: Cow<'static, str>, family: u32 },
    #[error("queue family {family} has no queues")]
    EmptyFamily { family: u32 },
}
