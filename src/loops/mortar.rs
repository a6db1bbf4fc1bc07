use crate::assembly::{Assembly, GlobalMatrix, GlobalTargets, GlobalVector, JacobianType, LocalKind};
use crate::element::{Elem, InteriorParent};
use crate::loops::{accumulate_jacobian, accumulate_residual, has_dofs, has_jacobian_block, Compute};
use crate::mapping::FeContext;
use crate::mesh::Mesh;
use crate::mortar::{MortarSegment, MortarSegmentMesh};
use crate::objects::{MortarConstraint, ObjectSet, PhysicsObject};
use crate::system::{SolutionState, System};
use eyre::{eyre, WrapErr};
use log::debug;
use nalgebra::Point3;
use std::sync::Arc;

/// Assembly of mortar constraints over the segments of a mortar segment mesh.
///
/// In block terms the secondary interior element is the element, the primary interior element the
/// neighbor and the secondary lower-dimensional element the lower element.
#[derive(Debug)]
pub struct MortarLoop<'a> {
    mesh: &'a Mesh,
    segments: &'a MortarSegmentMesh,
    objects: &'a ObjectSet,
    solution: &'a SolutionState,
    compute: Compute,
}

fn interior_parent(lower: &Elem) -> eyre::Result<InteriorParent> {
    lower
        .interior_parent()
        .ok_or_else(|| eyre!("lower-dimensional element {} has no interior parent", lower.id()))
}

impl<'a> MortarLoop<'a> {
    pub fn new(
        mesh: &'a Mesh,
        segments: &'a MortarSegmentMesh,
        objects: &'a ObjectSet,
        solution: &'a SolutionState,
        compute: Compute,
    ) -> Self {
        Self {
            mesh,
            segments,
            objects,
            solution,
            compute,
        }
    }

    pub fn segments(&self) -> &'a MortarSegmentMesh {
        self.segments
    }

    pub fn run_all<V: GlobalVector, M: GlobalMatrix>(
        &self,
        assembly: &mut Assembly,
        targets: &GlobalTargets<V, M>,
    ) -> eyre::Result<()> {
        self.run(assembly, self.segments.segments(), targets)
    }

    /// Runs the loop over `segments` and leaves the contribution cache of `assembly` empty.
    pub fn run<'s, V: GlobalVector, M: GlobalMatrix>(
        &self,
        assembly: &mut Assembly,
        segments: impl IntoIterator<Item = &'s MortarSegment>,
        targets: &GlobalTargets<V, M>,
    ) -> eyre::Result<()> {
        let interval = assembly.options().flush_interval();
        let mut assembled = 0;
        for segment in segments {
            let contributed = self
                .assemble_segment(assembly, segment)
                .wrap_err_with(|| format!("mortar loop failed on segment {}", segment.elem.id()))?;
            if contributed {
                assembled += 1;
                if assembled % interval == 0 {
                    assembly.add_cached(targets)?;
                }
            }
        }
        assembly.add_cached(targets)?;
        Ok(())
    }

    /// Returns whether the segment was assembled.
    fn assemble_segment(&self, assembly: &mut Assembly, segment: &MortarSegment) -> eyre::Result<bool> {
        let tolerance = assembly.options().mortar_segment_tolerance;
        let measure = segment.measure();
        if measure < tolerance {
            debug!(
                "Skipping mortar segment {} of measure {measure:e} below tolerance {tolerance:e}",
                segment.elem.id()
            );
            return Ok(false);
        }

        let system = Arc::clone(assembly.system());
        let info = &segment.info;
        let secondary_lower = self.mesh.elem(info.secondary_lower)?;
        let secondary = interior_parent(secondary_lower)?;
        assembly.reinit(self.mesh.elem(secondary.elem)?)?;
        assembly.reinit_mortar_elem(&segment.elem)?;

        let eta: Vec<f64> = assembly
            .mapper()
            .reference_points(FeContext::MortarSegment)?
            .iter()
            .map(|point| point.x)
            .collect();
        let on_side = |xi: &dyn Fn(f64) -> f64| -> Vec<Point3<f64>> {
            eta.iter()
                .map(|&eta| Point3::new(xi(eta), 0.0, 0.0))
                .collect()
        };
        let xi1 = on_side(&|eta| info.secondary_xi(eta));
        assembly.reinit_face_at(secondary.side, &xi1, None)?;

        let has_primary = match info.primary_lower {
            Some(primary_lower) => {
                let primary = interior_parent(self.mesh.elem(primary_lower)?)?;
                let xi2 = on_side(&|eta| info.primary_xi(eta));
                assembly.reinit_neighbor_at(self.mesh.elem(primary.elem)?, primary.side, &xi2)?;
                true
            }
            None => false,
        };
        assembly.reinit_lower_d_elem_at(secondary_lower, &xi1, None)?;

        assembly.prepare()?;
        if has_primary {
            assembly.prepare_neighbor()?;
        }
        assembly.prepare_lower()?;

        for constraint in &self.objects.constraints {
            self.run_constraint(assembly, &system, constraint.as_ref(), has_primary)
                .wrap_err_with(|| format!("mortar constraint `{}` failed", constraint.name()))?;
        }

        if self.compute.residual() {
            assembly.cache_residual()?;
            assembly.cache_residual_lower()?;
            if has_primary {
                assembly.cache_residual_neighbor()?;
            }
        }
        if self.compute.jacobian() {
            assembly.cache_jacobian()?;
            if has_primary {
                assembly.cache_jacobian_neighbor()?;
            }
            assembly.cache_jacobian_lower()?;
        }
        Ok(true)
    }

    fn run_constraint(
        &self,
        assembly: &mut Assembly,
        system: &System,
        constraint: &dyn MortarConstraint,
        has_primary: bool,
    ) -> eyre::Result<()> {
        let tags = constraint.tagging();
        let kinds: &[LocalKind] = if has_primary {
            &LocalKind::ALL
        } else {
            &[LocalKind::Element, LocalKind::Lower]
        };

        if self.compute.residual() {
            for &kind in kinds {
                let var = constraint.variable_of(kind);
                if has_dofs(assembly, kind, var) {
                    accumulate_residual(assembly, kind, var, tags.vector_tags(), |fe, residual| {
                        constraint.compute_residual(fe, self.solution, kind, residual)
                    })?;
                }
            }
        }

        if self.compute.jacobian() {
            let symmetric = constraint.symmetric();
            for jacobian_type in JacobianType::ALL {
                let (row_kind, col_kind) = (jacobian_type.row_kind(), jacobian_type.col_kind());
                if !kinds.contains(&row_kind) || !kinds.contains(&col_kind) {
                    continue;
                }
                let lower_row = row_kind == LocalKind::Lower;
                let lower_col = col_kind == LocalKind::Lower;
                // ElementLower and NeighborLower are filled together with LowerElement and LowerNeighbor
                if symmetric && lower_col && !lower_row {
                    continue;
                }
                let accumulate_transpose = symmetric && lower_row && !lower_col;
                let vars = (constraint.variable_of(row_kind), constraint.variable_of(col_kind));
                let mut present = has_jacobian_block(assembly, system, jacobian_type, vars.0, vars.1);
                if accumulate_transpose {
                    present &= system.coupling().is_coupled(vars.1 .0, vars.0 .0);
                }
                if present {
                    accumulate_jacobian(
                        assembly,
                        jacobian_type,
                        vars,
                        tags.matrix_tags(),
                        accumulate_transpose,
                        |fe, jacobian| constraint.compute_jacobian(fe, self.solution, jacobian_type, jacobian),
                    )?;
                }
            }
        }
        Ok(())
    }
}
