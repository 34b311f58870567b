// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// A thread-safe, unbounded event channel.
///
/// Producers on any thread hold a [`flume::Sender`] obtained from
/// [`EventBus::sender`]; the owner drains pending events once per frame with
/// [`EventBus::drain`].
#[derive(Debug)]
pub struct EventBus<T: Send + 'static> {
    sender: flume::Sender<T>,
    receiver: flume::Receiver<T>,
}

impl<T: Send + 'static> EventBus<T> {
    /// Creates a new bus.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    /// Sends an event from the owning side.
    pub fn publish(&self, event: T) {
        // The bus owns the receiver, so the channel cannot be disconnected here.
        if self.sender.send(event).is_err() {
            log::error!("EventBus receiver disconnected; event dropped.");
        }
    }

    /// Returns a sender for producers living on other threads.
    pub fn sender(&self) -> flume::Sender<T> {
        self.sender.clone()
    }

    /// Takes every event currently queued, in arrival order.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Returns `true` if no event is pending.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T: Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{FileEvent, FileEventKind};
    use std::thread;

    #[test]
    fn drain_returns_events_in_order() {
        let bus = EventBus::<FileEvent>::new();
        bus.publish(FileEvent::new(FileEventKind::Modified, "a.hlsl"));
        bus.publish(FileEvent::new(FileEventKind::Removed, "b.hlsli"));

        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].path.to_str(), Some("a.hlsl"));
        assert_eq!(events[1].kind, FileEventKind::Removed);
        assert!(bus.is_empty());
    }

    #[test]
    fn events_from_other_threads_are_received() {
        let bus = EventBus::<FileEvent>::new();
        let sender = bus.sender();

        thread::spawn(move || {
            sender
                .send(FileEvent::new(FileEventKind::Added, "new.hlsl"))
                .expect("bus alive");
        })
        .join()
        .expect("thread join");

        assert_eq!(
            bus.drain(),
            vec![FileEvent::new(FileEventKind::Added, "new.hlsl")]
        );
    }
}
