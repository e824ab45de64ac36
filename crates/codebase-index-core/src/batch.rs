//! Greedy token-budgeted batching for embedding requests.
//!
//! Items are packed in order: an item joins the open batch while the
//! batch's token sum stays within `max_tokens` (and its length within
//! `max_items`); otherwise the batch closes and the item opens the next
//! one. An item costing more than `max_tokens` on its own becomes a
//! singleton batch.
//!
//! Order is preserved within and across batches. The embedding pipeline
//! relies on this: provider results come back in request order and are
//! mapped to their source items strictly by index.

/// Ceilings applied while packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_tokens: usize,
    pub max_items: usize,
}

impl BatchLimits {
    pub fn new(max_tokens: usize, max_items: usize) -> Self {
        Self {
            max_tokens,
            max_items: max_items.max(1),
        }
    }
}

/// One embedding request worth of items.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    /// Sum of the items' token estimates.
    pub tokens: usize,
}

impl<T> Batch<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            tokens: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Pack `items` into batches under `limits`, using `cost` as the token estimate.
pub fn pack_batches<T, F>(items: Vec<T>, limits: BatchLimits, cost: F) -> Vec<Batch<T>>
where
    F: Fn(&T) -> usize,
{
    let mut batches = Vec::new();
    let mut current = Batch::empty();

    for item in items {
        let item_tokens = cost(&item);

        let overflows = current.tokens + item_tokens > limits.max_tokens
            || current.len() >= limits.max_items;
        if !current.is_empty() && overflows {
            batches.push(std::mem::replace(&mut current, Batch::empty()));
        }

        current.tokens += item_tokens;
        current.items.push(item);

        // Oversized items travel alone.
        if item_tokens > limits.max_tokens {
            batches.push(std::mem::replace(&mut current, Batch::empty()));
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
