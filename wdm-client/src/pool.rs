//! Fixed-size pool of subscription clients.
//!
//! Clients are created once, when the pool is built, and reused. A slot is
//! available when its client is `Free` with no references left. Handles carry
//! the generation of the slot at allocation, so a handle kept past `free()`
//! never reaches the client that reuses the slot.

use crate::client::SubscriptionClient;
use crate::config::Config;
use crate::error::ClientError;
use crate::timer::TimerRef;

/// Handle to a pooled client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    index: usize,
    generation: u32,
}

impl ClientHandle {
    /// Slot index, stable over the handle's lifetime.
    pub fn index(&self) -> usize {
        self.index
    }
}

struct Slot {
    generation: u32,
    client: SubscriptionClient,
}

impl Slot {
    fn is_available(&self) -> bool {
        self.client.is_free() && self.client.ref_count() == 0
    }
}

/// Preallocated clients.
pub struct ClientPool {
    slots: Vec<Slot>,
}

impl ClientPool {
    /// Build `config.client.pool_size` clients. `timers` supplies the timer
    /// service of each, by slot index.
    pub fn new<F>(config: &Config, mut timers: F) -> Self
    where
        F: FnMut(usize) -> TimerRef,
    {
        let slots = (0..config.client.pool_size)
            .map(|index| Slot {
                generation: 0,
                client: SubscriptionClient::new(index, config, timers(index)),
            })
            .collect();
        Self { slots }
    }

    /// Take a free client. The application's reference is held until
    /// [`SubscriptionClient::free`]; follow with
    /// [`SubscriptionClient::init`].
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when every client is in use.
    pub fn allocate(&mut self) -> Result<ClientHandle, ClientError> {
        let Some((index, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_available())
        else {
            return Err(ClientError::ResourceExhausted(format!(
                "all {} clients in use",
                self.slots.len()
            )));
        };
        slot.generation = slot.generation.wrapping_add(1);
        slot.client.add_ref();
        tracing::debug!("client[{}] allocated", index);
        Ok(ClientHandle {
            index,
            generation: slot.generation,
        })
    }

    /// The client behind a handle, unless it went back to the pool.
    pub fn get(&self, handle: ClientHandle) -> Option<&SubscriptionClient> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation && !slot.is_available())
            .map(|slot| &slot.client)
    }

    /// Mutable access to the client behind a handle.
    pub fn get_mut(&mut self, handle: ClientHandle) -> Option<&mut SubscriptionClient> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation && !slot.is_available())
            .map(|slot| &mut slot.client)
    }

    /// Number of clients.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of clients not yet returned.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_available()).count()
    }

    /// Every client in use, with its handle.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ClientHandle, &mut SubscriptionClient)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| !slot.is_available())
            .map(|(index, slot)| {
                (
                    ClientHandle {
                        index,
                        generation: slot.generation,
                    },
                    &mut slot.client,
                )
            })
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}
