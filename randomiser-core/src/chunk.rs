use std::ops::Range;

/// Rows per collapsible section of a large table.
pub const CHUNK_SIZE: usize = 20;

/// Splits `0..len` into consecutive ranges of `size` rows; the last range
/// may be shorter.
pub fn chunk_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub rows: Range<usize>,
    pub label: String,
    expanded: bool,
}

impl Chunk {
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn toggle(&mut self) {
        self.expanded = !self.expanded;
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }
}

/// How the rows of a table are presented: all at once, or as collapsed
/// sections of at most [`CHUNK_SIZE`] rows each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLayout {
    Flat,
    Chunked(Vec<Chunk>),
}

impl TableLayout {
    /// `labels` holds one display name per row, in row order.
    pub fn for_rows<S: AsRef<str>>(labels: &[S]) -> Self {
        Self::with_chunk_size(labels, CHUNK_SIZE)
    }

    pub fn with_chunk_size<S: AsRef<str>>(labels: &[S], size: usize) -> Self {
        if labels.len() <= size {
            return TableLayout::Flat;
        }
        let chunks = chunk_ranges(labels.len(), size)
            .into_iter()
            .map(|rows| {
                let first = labels[rows.start].as_ref();
                let last = labels[rows.end - 1].as_ref();
                Chunk {
                    label: format!("{} - {}", first, last),
                    rows,
                    expanded: false,
                }
            })
            .collect();
        TableLayout::Chunked(chunks)
    }

    pub fn chunks(&self) -> &[Chunk] {
        match self {
            TableLayout::Flat => &[],
            TableLayout::Chunked(chunks) => chunks,
        }
    }

    pub fn chunk_mut(&mut self, idx: usize) -> Option<&mut Chunk> {
        match self {
            TableLayout::Flat => None,
            TableLayout::Chunked(chunks) => chunks.get_mut(idx),
        }
    }

    pub fn set_all_expanded(&mut self, expanded: bool) {
        if let TableLayout::Chunked(chunks) = self {
            chunks.iter_mut().for_each(|c| c.set_expanded(expanded));
        }
    }
}
