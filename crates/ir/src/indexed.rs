//! Per item index bookkeeping for the output tables.

/// The item is not associated with the virtual file.
pub const UNASSOCIATED_VALUE: i32 = -2;
/// The item is associated with the virtual file but has no index yet.
pub const ASSOCIATED_VALUE: i32 = -1;
pub const MIN_VALID_VALUE: i32 = 0;

const SORTED_INDEX_UNKNOWN: i32 = -1;

/// Index state of an interned item.
///
/// An item can be referenced from several virtual output files. For each file
/// id the state is one of [`UNASSOCIATED_VALUE`], [`ASSOCIATED_VALUE`] or a
/// non-negative index. The per file vector only grows on demand; reading a file
/// id past its end yields [`UNASSOCIATED_VALUE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedItem {
    sorted_index: i32,
    virtual_file_indexes: Option<Vec<i32>>,
}

impl Default for IndexedItem {
    fn default() -> Self {
        Self {
            sorted_index: SORTED_INDEX_UNKNOWN,
            virtual_file_indexes: None,
        }
    }
}

impl IndexedItem {
    pub fn has_virtual_file_data(&self, virtual_file_id: usize) -> bool {
        self.virtual_file_index(virtual_file_id) != UNASSOCIATED_VALUE
    }

    /// Associates the item with `virtual_file_id`. Returns `true` if the item
    /// was not associated before.
    pub fn assign_to_virtual_file(&mut self, virtual_file_id: usize) -> bool {
        if self.has_virtual_file_data(virtual_file_id) {
            return false;
        }

        let indexes = self.virtual_file_indexes.get_or_insert_with(Vec::new);
        if virtual_file_id >= indexes.len() {
            indexes.resize(virtual_file_id + 1, UNASSOCIATED_VALUE);
        }
        let was_added = indexes[virtual_file_id] == UNASSOCIATED_VALUE;
        indexes[virtual_file_id] = ASSOCIATED_VALUE;
        was_added
    }

    /// Assigns the final index of the item in `virtual_file_id`.
    ///
    /// # Panics
    /// Panics if the item was never associated with the file or already has an
    /// index there.
    pub fn assign_virtual_file_index(&mut self, virtual_file_id: usize, index: i32) {
        assert!(index >= MIN_VALID_VALUE, "invalid file index {index}");
        let indexes = self
            .virtual_file_indexes
            .as_mut()
            .unwrap_or_else(|| panic!("item is not associated with file {virtual_file_id}"));
        assert!(
            indexes
                .get(virtual_file_id)
                .is_some_and(|&current| current == ASSOCIATED_VALUE),
            "item in file {virtual_file_id} is unassociated or already indexed"
        );
        indexes[virtual_file_id] = index;
    }

    pub fn virtual_file_index(&self, virtual_file_id: usize) -> i32 {
        self.virtual_file_indexes
            .as_ref()
            .and_then(|indexes| indexes.get(virtual_file_id).copied())
            .unwrap_or(UNASSOCIATED_VALUE)
    }

    pub fn set_sorted_index(&mut self, sorted_index: i32) {
        assert!(sorted_index > SORTED_INDEX_UNKNOWN);
        assert_eq!(
            self.sorted_index, SORTED_INDEX_UNKNOWN,
            "sorted index assigned twice"
        );
        self.sorted_index = sorted_index;
    }

    pub fn sorted_index(&self) -> Option<i32> {
        (self.sorted_index != SORTED_INDEX_UNKNOWN).then_some(self.sorted_index)
    }

    pub fn reset_sorted_index(&mut self) {
        self.sorted_index = SORTED_INDEX_UNKNOWN;
    }
}
