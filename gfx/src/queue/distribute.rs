use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use super::{QueueId, QueuePlanError, QueueRequest};
use crate::physical::HardwareCandidate;
use crate::util::FastHashMap;

/// Device queues assigned to a single role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAssignment {
    pub role: Cow<'static, str>,
    pub family: u32,
    /// One queue index per requested queue, possibly repeating.
    pub indices: SmallVec<[u32; 4]>,
}

impl QueueAssignment {
    pub fn queue_ids(&self) -> impl Iterator<Item = QueueId> + '_ {
        self.indices.iter().map(|&index| QueueId {
            family: self.family,
            index,
        })
    }
}

/// Queue counts to request per family and their assignment to roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDistributionPlan {
    family_counts: BTreeMap<u32, u32>,
    assignments: Vec<QueueAssignment>,
}

impl QueueDistributionPlan {
    /// Returns the number of queues to create for each family.
    pub fn family_counts(&self) -> &BTreeMap<u32, u32> {
        &self.family_counts
    }

    /// Returns assignments in request order.
    pub fn assignments(&self) -> &[QueueAssignment] {
        &self.assignments
    }

    /// Returns the first assignment of the role with the specified name.
    pub fn assignment(&self, role: &str) -> Option<&QueueAssignment> {
        self.assignments.iter().find(|a| a.role == role)
    }

    /// Returns all distinct queues used by the plan.
    pub fn queue_ids(&self) -> BTreeSet<QueueId> {
        self.assignments
            .iter()
            .flat_map(QueueAssignment::queue_ids)
            .collect()
    }
}

/// Distributes hardware queues among the requests.
///
/// Each family gets `min(total requested, hardware max)` queues. Requests
/// are then served in order, taking the next queue index of the family and
/// wrapping around once all granted queues are taken.
pub fn distribute(
    candidate: &HardwareCandidate,
    requests: &[QueueRequest],
) -> Result<QueueDistributionPlan, QueuePlanError> {
    let families = candidate.queue_families();

    let mut requested = BTreeMap::<u32, u32>::new();
    for request in requests {
        let Some(family) = families.get(request.family as usize) else {
            return Err(QueuePlanError::UnknownFamilyIndex {
                role: request.role.clone(),
                family: request.family,
            });
        };
        if family.queue_count == 0 {
            return Err(QueuePlanError::EmptyFamily {
                family: request.family,
            });
        }

        let total = requested.entry(request.family).or_default();
        *total = total.saturating_add(request.count);
    }

    let family_counts = requested
        .into_iter()
        .filter(|(_, total)| *total > 0)
        .map(|(family, total)| {
            let max = families[family as usize].queue_count;
            if total > max {
                tracing::debug!(
                    family,
                    requested = total,
                    granted = max,
                    "queue family is oversubscribed, queues will be shared",
                );
            }
            (family, total.min(max))
        })
        .collect::<BTreeMap<_, _>>();

    let mut cursors = FastHashMap::<u32, u32>::default();
    let assignments = requests
        .iter()
        .map(|request| {
            let granted = family_counts.get(&request.family).copied().unwrap_or_default();
            let cursor = cursors.entry(request.family).or_default();
            let indices = (0..request.count)
                .map(|_| {
                    let index = *cursor % granted;
                    *cursor += 1;
                    index
                })
                .collect();

            QueueAssignment {
                role: request.role.clone(),
                family: request.family,
                indices,
            }
        })
        .collect();

    Ok(QueueDistributionPlan {
        family_counts,
        assignments,
    })
}
