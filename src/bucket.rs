use std::io::Cursor;

use murmur3::murmur3_32;
use serde::Deserialize;

use crate::error::Result;

/// A Bucket is a hash space of `slot_size` slots, partitioned into ranges that each point at a
/// variation.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub id: i64,
    pub seed: i32,
    pub slot_size: i32,
    pub slots: Vec<Slot>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub start_inclusive: i32,
    pub end_exclusive: i32,
    pub variation_id: i64,
}

impl Slot {
    pub fn contains(&self, slot_number: i32) -> bool {
        self.start_inclusive <= slot_number && slot_number < self.end_exclusive
    }
}

impl Bucket {
    pub fn get_slot(&self, slot_number: i32) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.contains(slot_number))
    }
}

/// Assigns `identifier` to a slot of `bucket`. The result depends only on the bucket's seed, its
/// slot table and the identifier, so the same user always lands in the same slot.
pub fn bucketing<'a>(bucket: &'a Bucket, identifier: &str) -> Result<Option<&'a Slot>> {
    let slot_number = slot_number(bucket.seed, bucket.slot_size, identifier)?;
    Ok(bucket.get_slot(slot_number))
}

pub(crate) fn slot_number(seed: i32, slot_size: i32, identifier: &str) -> Result<i32> {
    if slot_size <= 0 {
        return Ok(0);
    }
    let hash = murmur3_32(&mut Cursor::new(identifier.as_bytes()), seed as u32)? as i32;
    Ok((hash.unsigned_abs() % slot_size as u32) as i32)
}
