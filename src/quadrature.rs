//! Quadrature rules per geometric context and the memoized reference shape tables.
//!
//! The [`QuadratureCache`] owns one rule per (context, reference shape) and rebuilds it only when
//! a higher order is requested for the (context, dimension) pair. Reference shape tables are
//! memoized per (FE type, element type, rule, side) and shared by every variable of the same FE
//! type. Access follows a two-phase protocol: [`QuadratureCache::ensure_reference_table`] may
//! build, [`QuadratureCache::reference_table`] is a plain immutable lookup.

use crate::element::ElemType;
use crate::error::AssemblyError;
use crate::fe::{evaluate_reference, n_shape_functions, FeType, ReferenceShapeEval};
use log::debug;
use nalgebra::{Matrix3, Point3, Vector3};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_quadrature::{rule_for_shape, ReferenceShape};

static NEXT_RULE_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_TABLE_BUILD_ID: AtomicU64 = AtomicU64::new(0);

/// The geometric context a rule is used in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuadratureContext {
    Volume,
    Face,
    Neighbor,
    Lower,
    MortarSegment,
}

/// Process-unique identity of a quadrature rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u64);

impl RuleId {
    fn next() -> Self {
        Self(NEXT_RULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reference points and weights of a rule on a reference shape.
///
/// Arbitrary rules carry caller-provided points and have no order.
#[derive(Debug, Clone)]
pub struct QuadratureRule {
    id: RuleId,
    shape: ReferenceShape,
    order: Option<usize>,
    points: Vec<Point3<f64>>,
    weights: Vec<f64>,
}

impl QuadratureRule {
    /// Builds a Gauss-type rule exact for polynomials of the given order.
    pub fn gauss(shape: ReferenceShape, order: usize) -> Result<Self, AssemblyError> {
        let (weights, points) = rule_for_shape(shape, order)?;
        Ok(Self {
            id: RuleId::next(),
            shape,
            order: Some(order),
            points: points.into_iter().map(Point3::from).collect(),
            weights,
        })
    }

    /// Builds a pass-through rule at the given points. Missing weights default to one.
    pub fn arbitrary(
        shape: ReferenceShape,
        points: &[Point3<f64>],
        weights: Option<&[f64]>,
    ) -> Result<Self, AssemblyError> {
        let weights = match weights {
            Some(weights) if weights.len() != points.len() => {
                return Err(AssemblyError::WeightCountMismatch {
                    points: points.len(),
                    weights: weights.len(),
                })
            }
            Some(weights) => weights.to_vec(),
            None => vec![1.0; points.len()],
        };
        Ok(Self {
            id: RuleId::next(),
            shape,
            order: None,
            points: points.to_vec(),
            weights,
        })
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn shape(&self) -> ReferenceShape {
        self.shape
    }

    pub fn dim(&self) -> usize {
        self.shape.dim()
    }

    pub fn order(&self) -> Option<usize> {
        self.order
    }

    pub fn is_arbitrary(&self) -> bool {
        self.order.is_none()
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Identifies one memoized reference table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceTableKey {
    pub fe_type: FeType,
    pub elem_type: ElemType,
    pub rule: RuleId,
    /// The side for face contexts, where rule points are mapped into the parent element.
    pub side: Option<u8>,
}

/// Reference-space shape data of one FE type at the points of one rule.
///
/// Data is stored shape-function-major: entry `(i, qp)` lives at `i * n_points + qp`.
#[derive(Debug, Clone)]
pub struct ReferenceShapeTable {
    build_id: u64,
    n_functions: usize,
    n_points: usize,
    values: Vec<f64>,
    gradients: Vec<Vector3<f64>>,
    hessians: Option<Vec<Matrix3<f64>>>,
}

impl ReferenceShapeTable {
    fn build(
        fe_type: FeType,
        elem_type: ElemType,
        points: &[Point3<f64>],
        with_hessians: bool,
        scratch: &mut ReferenceShapeEval,
    ) -> Result<Self, AssemblyError> {
        let n_functions = n_shape_functions(fe_type, elem_type)?;
        let n_points = points.len();
        let mut values = vec![0.0; n_functions * n_points];
        let mut gradients = vec![Vector3::zeros(); n_functions * n_points];
        let mut hessians = with_hessians.then(|| vec![Matrix3::zeros(); n_functions * n_points]);

        for (qp, xi) in points.iter().enumerate() {
            evaluate_reference(fe_type, elem_type, xi, with_hessians, scratch)?;
            for i in 0..n_functions {
                values[i * n_points + qp] = scratch.values[i];
                gradients[i * n_points + qp] = scratch.gradients[i];
                if let Some(hessians) = hessians.as_mut() {
                    hessians[i * n_points + qp] = scratch.hessians[i];
                }
            }
        }

        Ok(Self {
            build_id: NEXT_TABLE_BUILD_ID.fetch_add(1, Ordering::Relaxed),
            n_functions,
            n_points,
            values,
            gradients,
            hessians,
        })
    }

    /// Identity of this particular build. A rebuilt table always has a new build id.
    pub fn build_id(&self) -> u64 {
        self.build_id
    }

    pub fn n_functions(&self) -> usize {
        self.n_functions
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    pub fn has_hessians(&self) -> bool {
        self.hessians.is_some()
    }

    pub fn value(&self, i: usize, qp: usize) -> f64 {
        self.values[i * self.n_points + qp]
    }

    pub fn gradient(&self, i: usize, qp: usize) -> &Vector3<f64> {
        &self.gradients[i * self.n_points + qp]
    }

    /// # Panics
    ///
    /// Panics if the table was built without second derivatives.
    pub fn hessian(&self, i: usize, qp: usize) -> &Matrix3<f64> {
        let hessians = self
            .hessians
            .as_ref()
            .expect("reference table was built without second derivatives");
        &hessians[i * self.n_points + qp]
    }
}

/// Counters that make cache reuse observable.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub rules_built: usize,
    pub tables_built: usize,
}

#[derive(Debug, Default)]
pub struct QuadratureCache {
    orders: FxHashMap<(QuadratureContext, usize), usize>,
    rules: FxHashMap<(QuadratureContext, ReferenceShape), QuadratureRule>,
    arbitrary: FxHashMap<QuadratureContext, QuadratureRule>,
    tables: FxHashMap<ReferenceTableKey, ReferenceShapeTable>,
    scratch: ReferenceShapeEval,
    stats: CacheStats,
}

impl QuadratureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rule of the given context for the reference shape.
    ///
    /// The order of a (context, dimension) pair only ever grows: requesting a lower order returns
    /// the existing, more accurate rule, requesting a higher one replaces it.
    pub fn rule(
        &mut self,
        context: QuadratureContext,
        shape: ReferenceShape,
        order: usize,
    ) -> Result<&QuadratureRule, AssemblyError> {
        let cached_order = self.orders.entry((context, shape.dim())).or_insert(order);
        if order > *cached_order {
            *cached_order = order;
        }
        let order = *cached_order;

        let needs_build = self
            .rules
            .get(&(context, shape))
            .map_or(true, |rule| rule.order != Some(order));
        if needs_build {
            let rule = QuadratureRule::gauss(shape, order)?;
            debug!("Built {context:?} quadrature rule of order {order} on {shape:?} ({} points)", rule.len());
            self.stats.rules_built += 1;
            if let Some(old) = self.rules.insert((context, shape), rule) {
                self.purge_tables(old.id);
            }
        }
        // The entry exists: it was either present or inserted above
        Ok(&self.rules[&(context, shape)])
    }

    /// Installs a pass-through rule with caller-provided points for the context.
    pub fn set_arbitrary_points(
        &mut self,
        context: QuadratureContext,
        shape: ReferenceShape,
        points: &[Point3<f64>],
        weights: Option<&[f64]>,
    ) -> Result<&QuadratureRule, AssemblyError> {
        let rule = QuadratureRule::arbitrary(shape, points, weights)?;
        if let Some(old) = self.arbitrary.insert(context, rule) {
            self.purge_tables(old.id);
        }
        Ok(&self.arbitrary[&context])
    }

    /// Returns the reference table for `key`, building it at `points` if necessary.
    ///
    /// `points` must be the reference points (in the element described by `key`) that correspond
    /// to the rule identified by `key`.
    pub fn ensure_reference_table(
        &mut self,
        key: ReferenceTableKey,
        points: &[Point3<f64>],
        with_hessians: bool,
    ) -> Result<&ReferenceShapeTable, AssemblyError> {
        let up_to_date = self
            .tables
            .get(&key)
            .map_or(false, |table| table.has_hessians() || !with_hessians);
        if !up_to_date {
            let table = ReferenceShapeTable::build(key.fe_type, key.elem_type, points, with_hessians, &mut self.scratch)?;
            self.stats.tables_built += 1;
            self.tables.insert(key, table);
        }
        Ok(&self.tables[&key])
    }

    pub fn reference_table(&self, key: &ReferenceTableKey) -> Option<&ReferenceShapeTable> {
        self.tables.get(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn purge_tables(&mut self, rule: RuleId) {
        self.tables.retain(|key, _| key.rule != rule);
    }
}
