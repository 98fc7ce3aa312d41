use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// What to do with the packet that carried a fragment.
#[derive(Debug, PartialEq, Eq)]
pub enum FragVerdict {
    /// The fragment was absorbed; the datagram is still incomplete.
    Stolen,
    /// The last missing piece arrived. The payload is the reassembled
    /// IPv6 packet, fragment header removed.
    Complete(Vec<u8>),
}

/// Reassembly buckets are named the way RFC 2460 names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragKey {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub ident: u32,
    pub proto: u8,
}

/// One fragment's worth of upper-layer payload.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Byte offset of this piece within the reassembled payload.
    pub offset: usize,
    pub more: bool,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct Bucket {
    /// The 40-byte IPv6 header of the first fragment seen, reused for the
    /// reassembled packet.
    header: [u8; 40],
    frags: Vec<Fragment>,
    created: Instant,
}

impl Bucket {
    /// Sorted insert; any byte shared with an existing piece is an error.
    fn insert(&mut self, frag: Fragment) -> Result<()> {
        let start = frag.offset;
        let end = frag.offset + frag.data.len();
        for existing in &self.frags {
            let e_start = existing.offset;
            let e_end = existing.offset + existing.data.len();
            if start < e_end && e_start < end {
                return Err(Error::FragOverlap);
            }
        }
        let pos = self.frags.partition_point(|f| f.offset < start);
        self.frags.insert(pos, frag);
        Ok(())
    }

    /// Complete when the last fragment has arrived and the pieces tile
    /// the payload from offset zero with no holes.
    fn is_complete(&self) -> bool {
        match self.frags.last() {
            Some(last) if !last.more => {}
            _ => return false,
        }
        let mut expected = 0;
        for frag in &self.frags {
            if frag.offset != expected {
                return false;
            }
            expected += frag.data.len();
        }
        true
    }

    fn reassemble(self, proto: u8) -> Vec<u8> {
        let payload_len: usize = self.frags.iter().map(|f| f.data.len()).sum();
        let mut out = Vec::with_capacity(40 + payload_len);
        out.extend_from_slice(&self.header);
        for frag in &self.frags {
            out.extend_from_slice(&frag.data);
        }
        // Patch payload length and next header now that the fragment
        // header is gone.
        out[4] = (payload_len >> 8) as u8;
        out[5] = payload_len as u8;
        out[6] = proto;
        out
    }
}

/// Holds the fragments of partially-arrived IPv6 datagrams until they
/// can be translated whole.
#[derive(Debug, Default)]
pub struct FragDb {
    buckets: FxHashMap<FragKey, Bucket>,
    /// Bucket creation order, for expiry and the overflow drop.
    order: VecDeque<FragKey>,
}

impl FragDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment in. `header` is the packet's IPv6 header with
    /// the fragment header already stripped from the chain. `capacity`
    /// bounds the number of simultaneous buckets; the oldest bucket is
    /// dropped to make room.
    pub fn store(
        &mut self,
        now: Instant,
        key: FragKey,
        header: [u8; 40],
        frag: Fragment,
        capacity: usize,
    ) -> Result<FragVerdict> {
        if !self.buckets.contains_key(&key) {
            while self.buckets.len() >= capacity.max(1) {
                if let Some(oldest) = self.order.pop_front() {
                    self.buckets.remove(&oldest);
                    log::debug!("Fragment DB full; dropped the oldest datagram");
                } else {
                    break;
                }
            }
            self.buckets.insert(
                key,
                Bucket {
                    header,
                    frags: Vec::new(),
                    created: now,
                },
            );
            self.order.push_back(key);
        }

        let bucket = self.buckets.get_mut(&key).unwrap();
        if let Err(err) = bucket.insert(frag) {
            // A malformed datagram poisons its whole bucket.
            self.buckets.remove(&key);
            self.order.retain(|k| k != &key);
            return Err(err);
        }

        if bucket.is_complete() {
            let bucket = self.buckets.remove(&key).unwrap();
            self.order.retain(|k| k != &key);
            return Ok(FragVerdict::Complete(bucket.reassemble(key.proto)));
        }
        Ok(FragVerdict::Stolen)
    }

    /// Drop every bucket whose lifetime has elapsed.
    pub fn expire_at(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, b| b.created + ttl > now);
        let order = &mut self.order;
        let buckets = &self.buckets;
        order.retain(|k| buckets.contains_key(k));
        before - self.buckets.len()
    }

    pub fn next_deadline(&self, ttl: Duration) -> Option<Instant> {
        self.order
            .front()
            .and_then(|k| self.buckets.get(k))
            .map(|b| b.created + ttl)
    }

    pub fn count(&self) -> usize {
        self.buckets.len()
    }

    pub fn flush(&mut self) {
        self.buckets.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(2);

    fn key() -> FragKey {
        FragKey {
            src: "2001:db8::1".parse().unwrap(),
            dst: "64:ff9b::cb00:7105".parse().unwrap(),
            ident: 0xabcd,
            proto: 17,
        }
    }

    fn header() -> [u8; 40] {
        let mut h = [0u8; 40];
        h[0] = 0x60;
        h
    }

    fn frag(offset: usize, more: bool, data: &[u8]) -> Fragment {
        Fragment {
            offset,
            more,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_in_order_reassembly() {
        let mut db = FragDb::new();
        let now = Instant::now();
        assert_eq!(
            db.store(now, key(), header(), frag(0, true, &[1, 2, 3, 4]), 16).unwrap(),
            FragVerdict::Stolen
        );
        let got = db
            .store(now, key(), header(), frag(4, false, &[5, 6]), 16)
            .unwrap();
        let FragVerdict::Complete(pkt) = got else {
            panic!("expected completion");
        };
        assert_eq!(&pkt[40..], &[1, 2, 3, 4, 5, 6]);
        // Payload length and next header patched into the v6 header.
        assert_eq!(pkt[5], 6);
        assert_eq!(pkt[6], 17);
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut db = FragDb::new();
        let now = Instant::now();
        assert_eq!(
            db.store(now, key(), header(), frag(4, false, &[5, 6]), 16).unwrap(),
            FragVerdict::Stolen
        );
        let got = db
            .store(now, key(), header(), frag(0, true, &[1, 2, 3, 4]), 16)
            .unwrap();
        assert!(matches!(got, FragVerdict::Complete(_)));
    }

    #[test]
    fn test_hole_is_not_complete() {
        let mut db = FragDb::new();
        let now = Instant::now();
        db.store(now, key(), header(), frag(0, true, &[1, 2]), 16).unwrap();
        assert_eq!(
            db.store(now, key(), header(), frag(4, false, &[9]), 16).unwrap(),
            FragVerdict::Stolen
        );
    }

    #[test]
    fn test_overlap_poisons_bucket() {
        let mut db = FragDb::new();
        let now = Instant::now();
        db.store(now, key(), header(), frag(0, true, &[1, 2, 3, 4]), 16).unwrap();
        assert_eq!(
            db.store(now, key(), header(), frag(2, false, &[9, 9]), 16),
            Err(Error::FragOverlap)
        );
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn test_expiry_at_exact_ttl() {
        let mut db = FragDb::new();
        let start = Instant::now();
        db.store(start, key(), header(), frag(0, true, &[1]), 16).unwrap();

        assert_eq!(db.next_deadline(TTL), Some(start + TTL));
        assert_eq!(db.expire_at(start + TTL - Duration::from_millis(1), TTL), 0);
        // A bucket at exactly its TTL goes on the next sweep.
        assert_eq!(db.expire_at(start + TTL, TTL), 1);
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut db = FragDb::new();
        let now = Instant::now();
        for ident in 0..4u32 {
            let mut k = key();
            k.ident = ident;
            db.store(now, k, header(), frag(0, true, &[1]), 3).unwrap();
        }
        assert_eq!(db.count(), 3);
        // The first bucket is the one that went away.
        let mut k = key();
        k.ident = 0;
        assert!(!db.buckets.contains_key(&k));
    }
}
