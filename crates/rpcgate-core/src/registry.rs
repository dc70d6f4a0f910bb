use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::endpoint::{EndpointInfo, EndpointStatus, RemoteTarget};

struct EndpointSlot {
    status: EndpointStatus,
    target: Option<Weak<dyn RemoteTarget>>,
    generation: u64,
}

impl EndpointSlot {
    fn live_target(&self) -> Option<Arc<dyn RemoteTarget>> {
        if self.status != EndpointStatus::Registered {
            return None;
        }
        self.target.as_ref().and_then(Weak::upgrade)
    }
}

/// Tracks which targets are currently reachable, by name.
///
/// The registry only keeps weak handles: whoever deployed a target owns it,
/// and a dropped target stops resolving even without an explicit `unregister`.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<String, EndpointSlot>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target` under `id` and returns the entry's generation.
    ///
    /// Registering the implementation that is already live under `id` is a no-op.
    pub fn register(&self, id: &str, target: &Arc<dyn RemoteTarget>) -> u64 {
        let weak = Arc::downgrade(target);
        match self.endpoints.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let same = slot.status == EndpointStatus::Registered
                    && slot
                        .target
                        .as_ref()
                        .is_some_and(|current| current.ptr_eq(&weak) && current.strong_count() > 0);
                if same {
                    return slot.generation;
                }
                slot.generation += 1;
                slot.status = EndpointStatus::Registered;
                slot.target = Some(weak);
                info!(endpoint = %id, generation = slot.generation, "Endpoint re-registered");
                slot.generation
            }
            Entry::Vacant(vacant) => {
                vacant.insert(EndpointSlot {
                    status: EndpointStatus::Registered,
                    target: Some(weak),
                    generation: 1,
                });
                info!(endpoint = %id, generation = 1, "Endpoint registered");
                1
            }
        }
    }

    /// Marks `id` unregistered. Returns whether it was registered before.
    pub fn unregister(&self, id: &str) -> bool {
        match self.endpoints.get_mut(id) {
            Some(mut slot) if slot.status == EndpointStatus::Registered => {
                slot.status = EndpointStatus::Unregistered;
                slot.target = None;
                info!(endpoint = %id, "Endpoint unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn RemoteTarget>> {
        let live = {
            let slot = self.endpoints.get(id)?;
            if slot.status != EndpointStatus::Registered {
                return None;
            }
            slot.live_target()
        };

        if live.is_none() {
            // The owner dropped the target without unregistering it.
            if let Some(mut slot) = self.endpoints.get_mut(id) {
                let dead = slot
                    .target
                    .as_ref()
                    .is_none_or(|weak| weak.strong_count() == 0);
                if slot.status == EndpointStatus::Registered && dead {
                    slot.status = EndpointStatus::Unregistered;
                    slot.target = None;
                    debug!(endpoint = %id, "Endpoint target dropped, marked unregistered");
                }
            }
        }

        live
    }

    pub fn status(&self, id: &str) -> EndpointStatus {
        self.endpoints
            .get(id)
            .map(|slot| {
                if slot.live_target().is_some() {
                    EndpointStatus::Registered
                } else {
                    EndpointStatus::Unregistered
                }
            })
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<EndpointInfo> {
        let mut endpoints: Vec<EndpointInfo> = self
            .endpoints
            .iter()
            .map(|entry| {
                let live = entry.value().live_target();
                EndpointInfo {
                    id: entry.key().clone(),
                    status: if live.is_some() {
                        EndpointStatus::Registered
                    } else {
                        EndpointStatus::Unregistered
                    },
                    generation: entry.value().generation,
                    methods: live.map(|t| t.methods()).unwrap_or_default(),
                }
            })
            .collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }
}
