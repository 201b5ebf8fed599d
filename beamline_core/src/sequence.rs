//! Ordered beamline with position bookkeeping.
//!
//! # Lifecycle
//! A [`SequenceBuilder`] collects elements. [`SequenceBuilder::freeze`]
//! validates them and produces a [`Sequence`] whose layout (number, order,
//! category and integrator of the elements) never changes again. Only
//! numeric strengths of a frozen sequence can be changed, by index or by
//! name, which is what an optimizer needs between two tracking calls.

use crate::description::ElementDescription;
use crate::element::{Element, Strength};
use crate::error::{BeamlineError, Result};
use crate::integrators::IntegratorKind;
use crate::kinematics::Kinematics;
use crate::maps::TransferMap;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Append-only collection of elements.
#[derive(Clone, Debug, Default)]
pub struct SequenceBuilder {
    elements: Vec<Element>,
    default_integrator: Option<IntegratorKind>,
}

impl SequenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from untyped descriptions, converting each one.
    pub fn from_descriptions(descriptions: &[ElementDescription]) -> Result<Self> {
        let mut builder = Self::new();
        for d in descriptions {
            builder.push(d.to_element()?);
        }
        Ok(builder)
    }

    /// Integrator for thick elements that do not choose one themselves.
    pub fn with_default_integrator(mut self, kind: IntegratorKind) -> Self {
        self.default_integrator = Some(kind);
        self
    }

    pub fn element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    pub fn push(&mut self, element: Element) -> &mut Self {
        self.elements.push(element);
        self
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Validate every element and fix the layout.
    pub fn freeze(self) -> Result<Sequence> {
        if self.elements.is_empty() {
            return Err(BeamlineError::EmptySequence);
        }
        let mut elements = self.elements;
        if let Some(kind) = self.default_integrator {
            for e in elements.iter_mut() {
                if !e.is_thin() && !e.has_explicit_integrator() {
                    *e = e.clone().with_integrator(kind);
                }
            }
        }

        let mut index = HashMap::with_capacity(elements.len());
        for (i, e) in elements.iter().enumerate() {
            e.validate()?;
            if index.insert(e.name.clone(), i).is_some() {
                return Err(BeamlineError::DuplicateName(e.name.clone()));
            }
        }

        let mut sequence = Sequence {
            elements,
            index,
            exit_s: Vec::new(),
        };
        sequence.update_positions();
        tracing::debug!(
            elements = sequence.len(),
            length = sequence.total_length(),
            "sequence frozen"
        );
        Ok(sequence)
    }
}

// ---------------------------------------------------------------------------
// Frozen sequence
// ---------------------------------------------------------------------------

/// How to address an element of a frozen sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for ElementKey<'_> {
    fn from(i: usize) -> Self {
        ElementKey::Index(i)
    }
}

impl<'a> From<&'a str> for ElementKey<'a> {
    fn from(name: &'a str) -> Self {
        ElementKey::Name(name)
    }
}

impl<'a> From<&'a String> for ElementKey<'a> {
    fn from(name: &'a String) -> Self {
        ElementKey::Name(name)
    }
}

/// A validated beamline with fixed layout.
#[derive(Clone, Debug)]
pub struct Sequence {
    elements: Vec<Element>,
    index: HashMap<String, usize>,
    /// Cumulative path length at each element exit [m]
    exit_s: Vec<f64>,
}

impl Sequence {
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Always false: a frozen sequence has at least one element.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn index_of<'a>(&self, key: impl Into<ElementKey<'a>>) -> Result<usize> {
        match key.into() {
            ElementKey::Index(i) if i < self.elements.len() => Ok(i),
            ElementKey::Index(index) => Err(BeamlineError::IndexOutOfRange {
                index,
                len: self.elements.len(),
            }),
            ElementKey::Name(name) => self
                .index
                .get(name)
                .copied()
                .ok_or_else(|| BeamlineError::UnknownElement(name.to_string())),
        }
    }

    pub fn get<'a>(&self, key: impl Into<ElementKey<'a>>) -> Result<&Element> {
        let i = self.index_of(key)?;
        Ok(&self.elements[i])
    }

    /// Position of the element entrance [m].
    pub fn entry_s<'a>(&self, key: impl Into<ElementKey<'a>>) -> Result<f64> {
        let i = self.index_of(key)?;
        Ok(if i == 0 { 0.0 } else { self.exit_s[i - 1] })
    }

    /// Position of the element exit [m].
    pub fn exit_s<'a>(&self, key: impl Into<ElementKey<'a>>) -> Result<f64> {
        let i = self.index_of(key)?;
        Ok(self.exit_s[i])
    }

    /// Exit position for an index known to be in range.
    pub(crate) fn exit_s_at(&self, index: usize) -> f64 {
        self.exit_s[index]
    }

    pub fn total_length(&self) -> f64 {
        self.exit_s.last().copied().unwrap_or(0.0)
    }

    pub fn strength<'a>(
        &self,
        key: impl Into<ElementKey<'a>>,
        strength: Strength,
    ) -> Result<f64> {
        self.get(key)?.strength(strength)
    }

    /// Change one strength in place. Rejected values leave the sequence untouched.
    pub fn set_strength<'a>(
        &mut self,
        key: impl Into<ElementKey<'a>>,
        strength: Strength,
        value: f64,
    ) -> Result<()> {
        let i = self.index_of(key)?;
        self.elements[i].set_strength(strength, value)?;
        if strength == Strength::Angle {
            self.update_positions();
        }
        Ok(())
    }

    /// Apply a batch of strength changes: all of them or none.
    pub fn set_strengths<'a, K>(
        &mut self,
        updates: impl IntoIterator<Item = (K, Strength, f64)>,
    ) -> Result<()>
    where
        K: Into<ElementKey<'a>>,
    {
        let mut staged: Vec<(usize, Element)> = Vec::new();
        for (key, strength, value) in updates {
            let i = self.index_of(key)?;
            let slot = match staged.iter().position(|(j, _)| *j == i) {
                Some(p) => p,
                None => {
                    staged.push((i, self.elements[i].clone()));
                    staged.len() - 1
                }
            };
            staged[slot].1.set_strength(strength, value)?;
        }
        for (i, element) in staged {
            self.elements[i] = element;
        }
        self.update_positions();
        Ok(())
    }

    /// Transfer map of one element with its current strengths.
    pub fn transfer_map<'a>(
        &self,
        key: impl Into<ElementKey<'a>>,
        kin: &Kinematics,
    ) -> Result<TransferMap> {
        let i = self.index_of(key)?;
        Ok(element_map(&self.elements[i], kin))
    }

    /// Second-order map of the whole sequence.
    pub fn one_turn_map(&self, kin: &Kinematics) -> TransferMap {
        self.elements
            .iter()
            .fold(TransferMap::identity(), |acc, e| acc.then(&element_map(e, kin)))
    }

    /// Transfer maps of every element, in order.
    pub fn transfer_maps<'s>(
        &'s self,
        kin: &'s Kinematics,
    ) -> impl Iterator<Item = TransferMap> + 's {
        self.elements.iter().map(move |e| element_map(e, kin))
    }

    fn update_positions(&mut self) {
        let mut s = 0.0;
        self.exit_s = self
            .elements
            .iter()
            .map(|e| {
                s += e.path_length();
                s
            })
            .collect();
    }
}

fn element_map(element: &Element, kin: &Kinematics) -> TransferMap {
    element
        .integrator()
        .integrator()
        .transfer_map(element, kin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::Species;
    use approx::assert_abs_diff_eq;

    fn fodo() -> Sequence {
        SequenceBuilder::new()
            .element(Element::quadrupole("QF", 0.5, 1.2))
            .element(Element::drift("D1", 2.0))
            .element(Element::quadrupole("QD", 0.5, -1.2))
            .element(Element::drift("D2", 2.0))
            .freeze()
            .unwrap()
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert_eq!(
            SequenceBuilder::new().freeze().unwrap_err(),
            BeamlineError::EmptySequence
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = SequenceBuilder::new()
            .element(Element::drift("D", 1.0))
            .element(Element::drift("D", 1.0))
            .freeze()
            .unwrap_err();
        assert_eq!(err, BeamlineError::DuplicateName("D".into()));
    }

    #[test]
    fn positions_accumulate() {
        let seq = fodo();
        assert_eq!(seq.entry_s(0).unwrap(), 0.0);
        assert_eq!(seq.exit_s(1).unwrap(), 2.5);
        assert_eq!(seq.entry_s("QD").unwrap(), 2.5);
        assert_eq!(seq.total_length(), 5.0);
    }

    #[test]
    fn strengths_by_name_and_index() {
        let mut seq = fodo();
        seq.set_strength("QD", Strength::K1, -1.0).unwrap();
        assert_eq!(seq.strength(2, Strength::K1).unwrap(), -1.0);
        assert!(matches!(
            seq.set_strength("QX", Strength::K1, 1.0),
            Err(BeamlineError::UnknownElement(_))
        ));
        assert!(matches!(
            seq.set_strength(7, Strength::K1, 1.0),
            Err(BeamlineError::IndexOutOfRange { index: 7, len: 4 })
        ));
    }

    #[test]
    fn batch_update_is_all_or_nothing() {
        let mut seq = fodo();
        let result = seq.set_strengths([
            ("QF", Strength::K1, 2.0),
            ("D1", Strength::K1, 1.0),
        ]);
        assert!(result.is_err());
        assert_eq!(seq.strength("QF", Strength::K1).unwrap(), 1.2);

        seq.set_strengths([("QF", Strength::K1, 2.0), ("QD", Strength::K1, -2.0)])
            .unwrap();
        assert_eq!(seq.strength("QD", Strength::K1).unwrap(), -2.0);
    }

    #[test]
    fn out_of_range_lookups_are_errors() {
        let kin = Kinematics::from_kinetic_energy(Species::Proton, 200.0).unwrap();
        let seq = fodo();
        let out_of_range = BeamlineError::IndexOutOfRange { index: 4, len: 4 };
        assert_eq!(seq.entry_s(4).unwrap_err(), out_of_range);
        assert_eq!(seq.exit_s(4).unwrap_err(), out_of_range);
        assert_eq!(seq.transfer_map(4, &kin).unwrap_err(), out_of_range);
        assert!(matches!(
            seq.exit_s("QX"),
            Err(BeamlineError::UnknownElement(_))
        ));
    }

    #[test]
    fn rbend_angle_moves_downstream_positions() {
        let mut seq = SequenceBuilder::new()
            .element(Element::rbend("B", 1.0, 0.0))
            .element(Element::drift("D", 1.0))
            .freeze()
            .unwrap();
        assert_eq!(seq.total_length(), 2.0);
        seq.set_strength("B", Strength::Angle, 0.4).unwrap();
        let arc = 0.2 / 0.2_f64.sin();
        assert_abs_diff_eq!(seq.entry_s(1).unwrap(), arc, epsilon = 1e-15);
    }

    #[test]
    fn default_integrator_applies_to_thick_elements_only() {
        let seq = SequenceBuilder::new()
            .with_default_integrator(IntegratorKind::Exact)
            .element(Element::quadrupole("Q", 0.5, 1.0))
            .element(Element::multipole("M", vec![0.0, 0.1], vec![]))
            .element(Element::drift("D", 1.0).with_integrator(IntegratorKind::Transport))
            .freeze()
            .unwrap();
        let kinds: Vec<_> = seq.elements().iter().map(|e| e.integrator()).collect();
        assert_eq!(
            kinds,
            [
                IntegratorKind::Exact,
                IntegratorKind::Kick,
                IntegratorKind::Transport
            ]
        );
    }

    #[test]
    fn one_turn_map_composes_elements() {
        let kin = Kinematics::from_kinetic_energy(Species::Proton, 200.0).unwrap();
        let seq = fodo();
        let m = seq.one_turn_map(&kin);
        let mut r = crate::types::PhaseMatrix::identity();
        for i in 0..seq.len() {
            r = seq.transfer_map(i, &kin).unwrap().r * r;
        }
        assert_abs_diff_eq!(m.r, r, epsilon = 1e-14);
    }
}
