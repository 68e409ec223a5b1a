//! Key event queue between the tick interrupt and the main program.
//!
//! The queue is split once at boot: the tick interrupt owns the producer and
//! the main program the consumer, so neither side ever blocks. A full queue
//! rejects the new key instead of overwriting unread ones.

use heapless::spsc::{Consumer, Producer, Queue};

use super::Key;
use crate::config::KEY_QUEUE_DEPTH;

/// Backing storage. Holds `KEY_QUEUE_DEPTH - 1` keys.
pub type KeyQueue = Queue<Key, KEY_QUEUE_DEPTH>;

/// Interrupt end of a split [`KeyQueue`].
pub type KeyProducer<'a> = Producer<'a, Key>;

/// Main-program end of a split [`KeyQueue`].
pub type KeyConsumer<'a> = Consumer<'a, Key>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_arrival_order() {
        let mut queue = KeyQueue::new();
        let (mut producer, mut consumer) = queue.split();
        producer.enqueue(Key::A1).unwrap();
        producer.enqueue(Key::Enter).unwrap();
        assert_eq!(consumer.len(), 2);
        assert_eq!(consumer.dequeue(), Some(Key::A1));
        assert_eq!(consumer.dequeue(), Some(Key::Enter));
        assert_eq!(consumer.dequeue(), None);
    }

    #[test]
    fn full_queue_rejects_new_keys() {
        let mut queue = KeyQueue::new();
        let (mut producer, mut consumer) = queue.split();
        for _ in 0..KEY_QUEUE_DEPTH - 1 {
            producer.enqueue(Key::B2).unwrap();
        }
        assert_eq!(producer.enqueue(Key::C3), Err(Key::C3));
        assert_eq!(consumer.dequeue(), Some(Key::B2));
        producer.enqueue(Key::C3).unwrap();
        assert_eq!(consumer.len(), KEY_QUEUE_DEPTH - 1);
    }
}
