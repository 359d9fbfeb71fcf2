//! Spans: labelled intervals over the choice sequence
//!
//! Spans record which choices belong to one logical draw. They nest like a
//! call tree: index 0 is always the root span covering the whole sequence,
//! and every other span is numbered in the order it was started, so a
//! span's descendants always follow it contiguously.

/// One closed span, `[start, end)` in choice indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub index: usize,
    pub label: u64,
    pub start: usize,
    pub end: usize,
    pub depth: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Set when the span was stopped with `discard`, e.g. a rejected element.
    pub discarded: bool,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// The frozen span tree of a finished test case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spans {
    spans: Vec<Span>,
}

impl Spans {
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Span> {
        self.spans.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Span> {
        self.spans.iter()
    }

    pub fn root(&self) -> Option<&Span> {
        self.spans.first()
    }

    /// `index` followed by every later sibling, in order.
    pub fn siblings_from(&self, index: usize) -> Vec<usize> {
        let parent = match self.get(index).and_then(|span| span.parent) {
            Some(parent) => parent,
            None => return vec![index],
        };
        self.spans[parent]
            .children
            .iter()
            .copied()
            .filter(|&child| child >= index)
            .collect()
    }

    /// Indices of every span strictly nested inside `index`.
    pub fn descendants(&self, index: usize) -> std::ops::Range<usize> {
        let depth = match self.get(index) {
            Some(span) => span.depth,
            None => return index..index,
        };
        let end = self.spans[index + 1..]
            .iter()
            .position(|span| span.depth <= depth)
            .map_or(self.spans.len(), |offset| index + 1 + offset);
        index + 1..end
    }

    /// Children are contained in their parent and siblings do not overlap.
    pub fn is_well_formed(&self) -> bool {
        self.spans.iter().all(|span| {
            span.start <= span.end
                && span.parent.map_or(span.index == 0, |p| p < span.index && self.spans[p].contains(span))
                && span
                    .children
                    .windows(2)
                    .all(|pair| self.spans[pair[0]].end <= self.spans[pair[1]].start)
        })
    }
}

/// Span bookkeeping for a test case that is still running.
#[derive(Debug, Clone)]
pub(crate) struct SpanRecord {
    spans: Vec<Span>,
    stack: Vec<usize>,
}

impl SpanRecord {
    pub fn new(root_label: u64) -> Self {
        let mut record = Self {
            spans: Vec::new(),
            stack: Vec::new(),
        };
        record.start(root_label, 0);
        record
    }

    /// Opens a span at choice index `position` and returns its index.
    pub fn start(&mut self, label: u64, position: usize) -> usize {
        let index = self.spans.len();
        let parent = self.stack.last().copied();
        self.spans.push(Span {
            index,
            label,
            start: position,
            end: position,
            depth: self.stack.len(),
            parent,
            children: Vec::new(),
            discarded: false,
        });
        if let Some(parent) = parent {
            self.spans[parent].children.push(index);
        }
        self.stack.push(index);
        index
    }

    /// Closes the innermost open span. `None` if only the root is open.
    pub fn stop(&mut self, position: usize, discard: bool) -> Option<usize> {
        if self.stack.len() <= 1 {
            return None;
        }
        let index = self.stack.pop()?;
        let span = &mut self.spans[index];
        span.end = position;
        span.discarded = discard;
        Some(index)
    }

    /// Number of open spans, not counting the root.
    pub fn open(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    /// Closes everything still open, root included, at `position`.
    pub fn finish(mut self, position: usize) -> Spans {
        while let Some(index) = self.stack.pop() {
            self.spans[index].end = position;
        }
        Spans { spans: self.spans }
    }
}
