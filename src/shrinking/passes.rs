//! The individual shrink passes
//!
//! Every pass walks the current target and proposes edits through
//! [`Shrinker::consider`] or one of the replace helpers. Cursors advance only
//! when an edit at the current position fails, so a pass that keeps
//! succeeding keeps working the same spot.

use super::Shrinker;
use crate::choice::{
    choice_from_index, choice_to_index, ChoiceKey, ChoiceType, ChoiceValue, Constraints, IntegerConstraints,
};
use crate::data::Status;
use crate::executor::{Halt, Oracle};
use crate::floats::{float_to_lex, lex_to_float};
use crate::minimizer::{find_integer, minimize_integer, Minimizer};

use std::collections::HashMap;

/// Longest run of integers minimized together.
const MAX_INTEGER_RUN: usize = 8;

/// Furthest apart two choices can be and still trade weight.
const PAIR_WINDOW: usize = 8;

fn without(base: &[ChoiceValue], start: usize, end: usize) -> Vec<ChoiceValue> {
    let mut out = Vec::with_capacity(base.len().saturating_sub(end - start));
    out.extend_from_slice(&base[..start]);
    out.extend_from_slice(&base[end..]);
    out
}

/// Rebuilds `base` with the non-overlapping `blocks` (sorted by position)
/// placed in `order`. Choices between blocks stay where they are.
fn rearrange(base: &[ChoiceValue], blocks: &[(usize, usize)], order: &[usize]) -> Vec<ChoiceValue> {
    let (first, last) = match (blocks.first(), blocks.last()) {
        (Some(first), Some(last)) => (first.0, last.1),
        _ => return base.to_vec(),
    };
    let mut out = Vec::with_capacity(base.len());
    out.extend_from_slice(&base[..first]);
    for (slot, &source) in order.iter().enumerate() {
        let (start, end) = blocks[source];
        out.extend_from_slice(&base[start..end]);
        if let Some(&(next_start, _)) = blocks.get(slot + 1) {
            out.extend_from_slice(&base[blocks[slot].1..next_start]);
        }
    }
    out.extend_from_slice(&base[last..]);
    out
}

/// Moves `distance` away from `target` on the given side.
fn offset(target: i128, distance: u128, above: bool) -> Option<i128> {
    if above {
        target.checked_add_unsigned(distance)
    } else {
        target.checked_sub_unsigned(distance)
    }
}

impl<'a, O: Oracle> Shrinker<'a, O> {
    fn integer_at(&self, index: usize) -> Option<(i128, IntegerConstraints)> {
        let node = self.target.nodes.get(index).filter(|node| !node.was_forced)?;
        match (&node.value, &node.constraints) {
            (ChoiceValue::Integer(value), Constraints::Integer(constraints)) => Some((*value, *constraints)),
            _ => None,
        }
    }

    fn float_at(&self, index: usize) -> Option<f64> {
        let node = self.target.nodes.get(index).filter(|node| !node.was_forced)?;
        match (&node.value, &node.constraints) {
            (ChoiceValue::Float(value), Constraints::Float(_)) => Some(*value),
            _ => None,
        }
    }

    /// Element orders of a string or bytes node, with its minimum size.
    fn elements_at(&self, index: usize) -> Option<(Vec<u32>, usize)> {
        let node = self.target.nodes.get(index).filter(|node| !node.was_forced)?;
        match (&node.value, &node.constraints) {
            (ChoiceValue::Bytes(bytes), Constraints::Bytes(c)) => {
                Some((bytes.iter().map(|&b| u32::from(b)).collect(), c.min_size))
            }
            (ChoiceValue::String(s), Constraints::String(c)) => {
                let orders = s
                    .chars()
                    .map(|ch| c.intervals.index_of(ch).and_then(|i| u32::try_from(i).ok()))
                    .collect::<Option<Vec<u32>>>()?;
                Some((orders, c.min_size))
            }
            _ => None,
        }
    }

    fn collection_value(&self, index: usize, orders: &[u32]) -> Option<ChoiceValue> {
        match &self.target.nodes.get(index)?.constraints {
            Constraints::Bytes(_) => orders
                .iter()
                .map(|&o| u8::try_from(o).ok())
                .collect::<Option<Vec<u8>>>()
                .map(ChoiceValue::Bytes),
            Constraints::String(c) => orders
                .iter()
                .map(|&o| c.intervals.char_at(o as usize))
                .collect::<Option<String>>()
                .map(ChoiceValue::String),
            _ => None,
        }
    }

    /// Deletes every outermost discarded span at once.
    pub(super) fn remove_discarded(&mut self) -> Result<(), Halt> {
        loop {
            let mut blocks: Vec<(usize, usize)> = Vec::new();
            for span in self.target.spans.iter().filter(|span| span.discarded && !span.is_empty()) {
                if blocks.last().map_or(true, |&(_, end)| span.start >= end) {
                    blocks.push((span.start, span.end));
                }
            }
            if blocks.is_empty() {
                return Ok(());
            }
            let base = self.choices();
            let mut attempt = Vec::with_capacity(base.len());
            let mut cursor = 0;
            for (start, end) in blocks {
                attempt.extend_from_slice(&base[cursor..start]);
                cursor = end;
            }
            attempt.extend_from_slice(&base[cursor..]);
            if !self.consider(attempt)? {
                return Ok(());
            }
        }
    }

    pub(super) fn span_deletion(&mut self) -> Result<(), Halt> {
        let mut index = 1;
        while index < self.target.spans.len() {
            if !self.delete_sibling_run(index)? {
                index += 1;
            }
        }
        Ok(())
    }

    /// Deletes span `index`, then as many of its following siblings as will
    /// go with it.
    fn delete_sibling_run(&mut self, index: usize) -> Result<bool, Halt> {
        let blocks: Vec<(usize, usize)> = self
            .target
            .spans
            .siblings_from(index)
            .into_iter()
            .filter_map(|sibling| self.target.spans.get(sibling))
            .map(|span| (span.start, span.end))
            .collect();
        let start = match blocks.first() {
            Some(&(start, end)) if start < end => start,
            _ => return Ok(false),
        };
        let base = self.choices();
        if !self.consider(without(&base, start, blocks[0].1))? {
            return Ok(false);
        }
        find_integer(|k| {
            let k = match usize::try_from(k) {
                Ok(k) if k >= 1 && k <= blocks.len() => k,
                _ => return Ok(false),
            };
            if k == 1 {
                return Ok(true);
            }
            self.consider(without(&base, start, blocks[k - 1].1))
        })?;
        Ok(true)
    }

    pub(super) fn node_deletion(&mut self) -> Result<(), Halt> {
        let mut index = 0;
        while index < self.target.len() {
            let base = self.choices();
            let deleted = find_integer(|k| {
                let end = match usize::try_from(k).ok().and_then(|k| index.checked_add(k)) {
                    Some(end) if end <= base.len() => end,
                    _ => return Ok(false),
                };
                self.consider(without(&base, index, end))
            })?;
            if deleted == 0 {
                index += 1;
            }
        }
        Ok(())
    }

    pub(super) fn zero_spans(&mut self) -> Result<(), Halt> {
        let mut index = 0;
        while index < self.target.spans.len() {
            self.zero_span(index)?;
            index += 1;
        }
        Ok(())
    }

    /// Sets every unforced choice in span `index` to its simplest value.
    fn zero_span(&mut self, index: usize) -> Result<(), Halt> {
        let (label, start, end) = match self.target.spans.get(index) {
            Some(span) if !span.is_empty() => (span.label, span.start, span.end),
            _ => return Ok(()),
        };
        let base = self.choices();
        let mut attempt = base.clone();
        for (position, node) in self.target.nodes[start..end].iter().enumerate() {
            if !node.was_forced {
                attempt[start + position] = node.constraints.simplest();
            }
        }
        if attempt == base {
            return Ok(());
        }
        let result = match self.execute_candidate(&attempt)? {
            Some(result) => result,
            None => return Ok(()),
        };
        if self.incorporate(&result) {
            return Ok(());
        }
        if result.status != Status::Overflow {
            // Zeroed spans often consume fewer choices. Splice in what the
            // span actually used and keep the rest of the old target.
            if let Some(span) = result.spans.get(index) {
                if span.label == label && span.start == start && span.end < end && span.end <= result.len() {
                    let mut spliced = base[..start].to_vec();
                    spliced.extend(result.nodes[start..span.end].iter().map(|node| node.value.clone()));
                    spliced.extend_from_slice(&base[end..]);
                    self.consider(spliced)?;
                    return Ok(());
                }
            }
        }
        self.repair(&attempt, &result, end)?;
        Ok(())
    }

    pub(super) fn minimize_individual_choices(&mut self) -> Result<(), Halt> {
        let mut index = 0;
        while index < self.target.len() {
            let node = &self.target.nodes[index];
            if !node.trivial() {
                let simplest = node.constraints.simplest();
                match node.choice_type() {
                    ChoiceType::Boolean => {
                        self.try_replace(index, simplest)?;
                    }
                    ChoiceType::Integer => self.minimize_integer_at(index)?,
                    ChoiceType::Float => self.minimize_float_at(index)?,
                    ChoiceType::String | ChoiceType::Bytes => self.minimize_collection_at(index)?,
                }
            }
            index += 1;
        }
        Ok(())
    }

    /// Shrinks the distance to `shrink_towards` on the value's own side.
    /// Values below the target also try the mirror image above it, which
    /// sorts earlier, and keep shrinking from there.
    fn minimize_integer_at(&mut self, index: usize) -> Result<(), Halt> {
        let mut mirrored = false;
        loop {
            let (value, constraints) = match self.integer_at(index) {
                Some(found) => found,
                None => return Ok(()),
            };
            let target = constraints.effective_shrink_towards();
            let above = value > target;
            minimize_integer(value.abs_diff(target), |distance| match offset(target, distance, above) {
                Some(candidate) => self.try_replace(index, ChoiceValue::Integer(candidate)),
                None => Ok(false),
            })?;
            if mirrored {
                return Ok(());
            }
            let mirror = match self.integer_at(index) {
                Some((current, _)) if current < target => offset(target, current.abs_diff(target), true),
                _ => None,
            };
            match mirror {
                Some(mirror) if self.try_replace(index, ChoiceValue::Integer(mirror))? => mirrored = true,
                _ => return Ok(()),
            }
        }
    }

    fn minimize_float_at(&mut self, index: usize) -> Result<(), Halt> {
        let value = match self.float_at(index) {
            Some(value) => value,
            None => return Ok(()),
        };
        if value.is_nan() {
            let simplest = self.target.nodes[index].constraints.simplest();
            self.try_replace(index, simplest)?;
            return Ok(());
        }
        if value.is_sign_negative() {
            self.try_replace(index, ChoiceValue::Float(-value))?;
        }
        let current = match self.float_at(index) {
            Some(current) if !current.is_nan() => current,
            _ => return Ok(()),
        };
        let negative = current.is_sign_negative();
        let start = u128::from(float_to_lex(current.abs()));
        Minimizer::new(vec![start], |candidate: &[u128]| -> Result<bool, Halt> {
            let magnitude = match u64::try_from(candidate[0]) {
                Ok(encoded) => lex_to_float(encoded),
                Err(_) => return Ok(false),
            };
            let value = if negative { -magnitude } else { magnitude };
            self.try_replace(index, ChoiceValue::Float(value))
        })
        .run()?;
        Ok(())
    }

    /// Tries the simplest value, then shortens, then lowers the elements.
    fn minimize_collection_at(&mut self, index: usize) -> Result<(), Halt> {
        let simplest = self.target.nodes[index].constraints.simplest();
        if self.try_replace(index, simplest)? {
            return Ok(());
        }

        let mut cursor = 0;
        loop {
            let (orders, min_size) = match self.elements_at(index) {
                Some(found) => found,
                None => return Ok(()),
            };
            if cursor >= orders.len() || orders.len() <= min_size {
                break;
            }
            let deleted = find_integer(|k| {
                let end = match usize::try_from(k).ok().and_then(|k| cursor.checked_add(k)) {
                    Some(end) if end <= orders.len() && orders.len() - (end - cursor) >= min_size => end,
                    _ => return Ok(false),
                };
                let mut shorter = orders.clone();
                shorter.drain(cursor..end);
                match self.collection_value(index, &shorter) {
                    Some(value) => self.try_replace(index, value),
                    None => Ok(false),
                }
            })?;
            if deleted == 0 {
                cursor += 1;
            }
        }

        let orders = match self.elements_at(index) {
            Some((orders, _)) if !orders.is_empty() => orders,
            _ => return Ok(()),
        };
        Minimizer::new(
            orders.into_iter().map(u128::from).collect(),
            |candidate: &[u128]| -> Result<bool, Halt> {
                let orders = candidate
                    .iter()
                    .map(|&o| u32::try_from(o).ok())
                    .collect::<Option<Vec<u32>>>();
                match orders.and_then(|orders| self.collection_value(index, &orders)) {
                    Some(value) => self.try_replace(index, value),
                    None => Ok(false),
                }
            },
        )
        .run()?;
        Ok(())
    }

    /// Lowers groups of identical values together.
    pub(super) fn minimize_duplicated_choices(&mut self) -> Result<(), Halt> {
        let mut groups: Vec<(ChoiceValue, Vec<usize>)> = Vec::new();
        let mut positions: HashMap<ChoiceValue, usize> = HashMap::new();
        for (index, node) in self.target.nodes.iter().enumerate() {
            if node.trivial() {
                continue;
            }
            match positions.get(&node.value) {
                Some(&group) => groups[group].1.push(index),
                None => {
                    positions.insert(node.value.clone(), groups.len());
                    groups.push((node.value.clone(), vec![index]));
                }
            }
        }

        for (value, indices) in groups.into_iter().filter(|(_, indices)| indices.len() > 1) {
            let unchanged = indices
                .iter()
                .all(|&i| self.target.nodes.get(i).map_or(false, |node| node.value == value));
            if !unchanged {
                continue;
            }
            let first = indices[0];
            match value {
                ChoiceValue::Integer(v) => {
                    let target = match &self.target.nodes[first].constraints {
                        Constraints::Integer(c) => c.effective_shrink_towards(),
                        _ => continue,
                    };
                    let above = v > target;
                    minimize_integer(v.abs_diff(target), |distance| match offset(target, distance, above) {
                        Some(candidate) => self.try_replace_all(&indices, ChoiceValue::Integer(candidate)),
                        None => Ok(false),
                    })?;
                }
                ChoiceValue::Float(f) if !f.is_nan() => {
                    let negative = f.is_sign_negative();
                    Minimizer::new(
                        vec![u128::from(float_to_lex(f.abs()))],
                        |candidate: &[u128]| -> Result<bool, Halt> {
                            let magnitude = match u64::try_from(candidate[0]) {
                                Ok(encoded) => lex_to_float(encoded),
                                Err(_) => return Ok(false),
                            };
                            let value = if negative { -magnitude } else { magnitude };
                            self.try_replace_all(&indices, ChoiceValue::Float(value))
                        },
                    )
                    .run()?;
                }
                _ => {
                    let simplest = self.target.nodes[first].constraints.simplest();
                    self.try_replace_all(&indices, simplest)?;
                }
            }
        }
        Ok(())
    }

    fn try_replace_all(&mut self, indices: &[usize], value: ChoiceValue) -> Result<bool, Halt> {
        let replacements: Vec<(usize, ChoiceValue)> = indices.iter().map(|&i| (i, value.clone())).collect();
        self.try_replacements(&replacements)
    }

    pub(super) fn reorder_spans(&mut self) -> Result<(), Halt> {
        let mut parent = 0;
        while parent < self.target.spans.len() {
            if !self.reorder_children(parent)? {
                parent += 1;
            }
        }
        Ok(())
    }

    /// Sorts same-labelled children of `parent` so smaller ones come first.
    fn reorder_children(&mut self, parent: usize) -> Result<bool, Halt> {
        let children = match self.target.spans.get(parent) {
            Some(span) if span.children.len() > 1 => span.children.clone(),
            _ => return Ok(false),
        };
        let mut groups: Vec<(u64, Vec<(usize, usize)>)> = Vec::new();
        for child in children {
            let span = match self.target.spans.get(child) {
                Some(span) => span,
                None => continue,
            };
            match groups.iter_mut().find(|(label, _)| *label == span.label) {
                Some((_, blocks)) => blocks.push((span.start, span.end)),
                None => groups.push((span.label, vec![(span.start, span.end)])),
            }
        }

        let base = self.choices();
        for (_, blocks) in groups.into_iter().filter(|(_, blocks)| blocks.len() > 1) {
            let keys: Vec<(usize, Vec<ChoiceKey>)> = blocks
                .iter()
                .map(|&(start, end)| (end - start, self.target.nodes[start..end].iter().map(|n| n.key()).collect()))
                .collect();
            let mut order: Vec<usize> = (0..blocks.len()).collect();
            order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
            if order.iter().enumerate().any(|(slot, &source)| slot != source)
                && self.consider(rearrange(&base, &blocks, &order))?
            {
                return Ok(true);
            }
            for k in 1..blocks.len() {
                if keys[k] < keys[k - 1] {
                    let mut order: Vec<usize> = (0..blocks.len()).collect();
                    order.swap(k - 1, k);
                    if self.consider(rearrange(&base, &blocks, &order))? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    pub(super) fn minimize_integer_runs(&mut self) -> Result<(), Halt> {
        let mut start = 0;
        while start < self.target.len() {
            let mut end = start;
            while end < self.target.len() && end - start < MAX_INTEGER_RUN && self.integer_at(end).is_some() {
                end += 1;
            }
            if end - start >= 2 {
                self.minimize_integer_run(start, end)?;
            }
            start = end.max(start + 1);
        }
        Ok(())
    }

    /// Minimizes the distances of `[start, end)` from their targets as one
    /// sequence, keeping each value on its side.
    fn minimize_integer_run(&mut self, start: usize, end: usize) -> Result<(), Halt> {
        let mut sides = Vec::with_capacity(end - start);
        let mut distances = Vec::with_capacity(end - start);
        for index in start..end {
            let (value, constraints) = match self.integer_at(index) {
                Some(found) => found,
                None => return Ok(()),
            };
            let target = constraints.effective_shrink_towards();
            sides.push((target, value > target));
            distances.push(value.abs_diff(target));
        }
        if distances.iter().all(|&d| d == 0) {
            return Ok(());
        }
        Minimizer::new(distances, |candidate: &[u128]| -> Result<bool, Halt> {
            let mut replacements = Vec::with_capacity(candidate.len());
            for (position, (&distance, &(target, above))) in candidate.iter().zip(&sides).enumerate() {
                match offset(target, distance, above) {
                    Some(value) => replacements.push((start + position, ChoiceValue::Integer(value))),
                    None => return Ok(false),
                }
            }
            self.try_replacements(&replacements)
        })
        .run()?;
        Ok(())
    }

    pub(super) fn redistribute_integer_pairs(&mut self) -> Result<(), Halt> {
        let mut i = 0;
        while i < self.target.len() {
            let mut j = i + 1;
            while j < self.target.len() && j <= i + PAIR_WINDOW {
                self.redistribute(i, j)?;
                self.redistribute(j, i)?;
                j += 1;
            }
            i += 1;
        }
        Ok(())
    }

    /// Moves weight from choice `from` towards its target and onto choice
    /// `onto`, for tests that only care about a combination of the two.
    fn redistribute(&mut self, from: usize, onto: usize) -> Result<(), Halt> {
        let ((a, constraints), (b, _)) = match (self.integer_at(from), self.integer_at(onto)) {
            (Some(first), Some(second)) => (first, second),
            _ => return Ok(()),
        };
        let target = constraints.effective_shrink_towards();
        if a == target {
            return Ok(());
        }
        let above = a > target;
        let distance = a.abs_diff(target);
        find_integer(|k| {
            if k > distance {
                return Ok(false);
            }
            let moved = if above {
                a.checked_sub_unsigned(k).zip(b.checked_add_unsigned(k))
            } else {
                a.checked_add_unsigned(k).zip(b.checked_sub_unsigned(k))
            };
            match moved {
                Some((x, y)) => {
                    self.try_replacements(&[(from, ChoiceValue::Integer(x)), (onto, ChoiceValue::Integer(y))])
                }
                None => Ok(false),
            }
        })?;
        Ok(())
    }

    pub(super) fn pass_to_descendant(&mut self) -> Result<(), Halt> {
        let mut index = 1;
        while index < self.target.spans.len() {
            if !self.replace_with_descendant(index)? {
                index += 1;
            }
        }
        Ok(())
    }

    /// Replaces span `index` with a strictly smaller nested span of the same
    /// label.
    fn replace_with_descendant(&mut self, index: usize) -> Result<bool, Halt> {
        let (label, start, end) = match self.target.spans.get(index) {
            Some(span) => (span.label, span.start, span.end),
            None => return Ok(false),
        };
        let candidates: Vec<(usize, usize)> = self
            .target
            .spans
            .descendants(index)
            .filter_map(|d| self.target.spans.get(d))
            .filter(|d| d.label == label && d.len() < end - start)
            .map(|d| (d.start, d.end))
            .collect();
        let base = self.choices();
        for (inner_start, inner_end) in candidates {
            let mut attempt = base[..start].to_vec();
            attempt.extend_from_slice(&base[inner_start..inner_end]);
            attempt.extend_from_slice(&base[end..]);
            if self.consider(attempt)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(super) fn lower_and_delete(&mut self) -> Result<(), Halt> {
        let mut index = 0;
        while index < self.target.len() {
            self.lower_and_delete_at(index)?;
            index += 1;
        }
        Ok(())
    }

    /// Lowers choice `index` by one step, then looks for a later span whose
    /// deletion makes the lowered case work.
    fn lower_and_delete_at(&mut self, index: usize) -> Result<(), Halt> {
        let node = match self.target.nodes.get(index) {
            Some(node) if !node.trivial() => node,
            _ => return Ok(()),
        };
        let lowered = match choice_to_index(&node.value, &node.constraints)
            .filter(|&i| i > 0)
            .and_then(|i| choice_from_index(i - 1, &node.constraints))
        {
            Some(lowered) => lowered,
            None => return Ok(()),
        };
        let mut attempt = self.choices();
        attempt[index] = lowered;
        let result = match self.execute_candidate(&attempt)? {
            Some(result) => result,
            None => return Ok(()),
        };
        if self.incorporate(&result) {
            return Ok(());
        }
        let deletable: Vec<(usize, usize)> = self
            .target
            .spans
            .iter()
            .filter(|span| span.start > index && !span.is_empty() && span.end <= attempt.len())
            .map(|span| (span.start, span.end))
            .collect();
        for (start, end) in deletable {
            if self.consider(without(&attempt, start, end))? {
                return Ok(());
            }
        }
        Ok(())
    }
}
