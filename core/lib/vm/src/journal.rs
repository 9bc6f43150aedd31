use std::collections::BTreeMap;

use opnet_basic_types::H256;

type Key = (H256, H256);

/// Frame-structured buffer of permanent storage writes. Writes land in the
/// top frame; committing a frame folds its slice into the parent, reverting
/// discards it. Only the outermost commit reaches the store.
#[derive(Debug, Default)]
pub(crate) struct StorageJournal {
    frames: Vec<BTreeMap<Key, H256>>,
}

impl StorageJournal {
    pub fn begin_frame(&mut self) {
        self.frames.push(BTreeMap::new());
    }

    pub fn commit_frame(&mut self) {
        if let Some(top) = self.frames.pop() {
            match self.frames.last_mut() {
                Some(parent) => parent.extend(top),
                None => self.frames.push(top),
            }
        }
    }

    pub fn revert_frame(&mut self) {
        self.frames.pop();
    }

    pub fn write(&mut self, contract: H256, pointer: H256, value: H256) {
        if let Some(top) = self.frames.last_mut() {
            top.insert((contract, pointer), value);
        }
    }

    /// Most recent buffered write for a key, searching frames innermost
    /// first.
    pub fn read(&self, contract: H256, pointer: H256) -> Option<H256> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(&(contract, pointer)).copied())
    }

    /// Last-write-wins view after the outermost frame committed.
    pub fn into_changes(mut self) -> BTreeMap<H256, BTreeMap<H256, H256>> {
        let mut changes: BTreeMap<H256, BTreeMap<H256, H256>> = BTreeMap::new();
        for frame in self.frames.drain(..) {
            for ((contract, pointer), value) in frame {
                changes.entry(contract).or_default().insert(pointer, value);
            }
        }
        changes
    }
}

/// Transient storage. Unlike the journal, every frame sees only its own
/// values and the whole slice is discarded when the frame ends.
#[derive(Debug, Default)]
pub(crate) struct TransientStorage {
    frames: Vec<BTreeMap<Key, H256>>,
}

impl TransientStorage {
    pub fn begin_frame(&mut self) {
        self.frames.push(BTreeMap::new());
    }

    pub fn end_frame(&mut self) {
        self.frames.pop();
    }

    pub fn write(&mut self, contract: H256, pointer: H256, value: H256) {
        if let Some(top) = self.frames.last_mut() {
            top.insert((contract, pointer), value);
        }
    }

    pub fn read(&self, contract: H256, pointer: H256) -> Option<H256> {
        self.frames
            .last()
            .and_then(|frame| frame.get(&(contract, pointer)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    #[test]
    fn revert_discards_frame_slice() {
        let mut journal = StorageJournal::default();
        journal.begin_frame();
        journal.write(key(1), key(2), key(0xa));

        journal.begin_frame();
        journal.write(key(1), key(2), key(0xb));
        assert_eq!(journal.read(key(1), key(2)), Some(key(0xb)));

        journal.revert_frame();
        assert_eq!(journal.read(key(1), key(2)), Some(key(0xa)));
    }

    #[test]
    fn commit_folds_into_parent() {
        let mut journal = StorageJournal::default();
        journal.begin_frame();
        journal.begin_frame();
        journal.write(key(1), key(2), key(0xc));
        journal.commit_frame();

        assert_eq!(journal.read(key(1), key(2)), Some(key(0xc)));
        journal.commit_frame();

        let changes = journal.into_changes();
        assert_eq!(changes[&key(1)][&key(2)], key(0xc));
    }

    #[test]
    fn transient_frames_are_isolated() {
        let mut transient = TransientStorage::default();
        transient.begin_frame();
        transient.write(key(1), key(2), key(0xa));

        transient.begin_frame();
        assert_eq!(transient.read(key(1), key(2)), None);
        transient.end_frame();

        assert_eq!(transient.read(key(1), key(2)), Some(key(0xa)));
        transient.end_frame();
        assert_eq!(transient.read(key(1), key(2)), None);
    }
}
