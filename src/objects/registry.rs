use crate::element::{BoundaryId, SubdomainId};
use crate::error::AssemblyError;
use crate::objects::{
    AuxKernel, BodyForce, Diffusion, ElementAverageAux, ElementVolumeAux, EqualValueConstraint, IntegratedBc,
    InterfaceKernel, Kernel, MortarConstraint, NeumannBc, ObjectBase, ObjectTags, PenaltyInterface, Reaction,
};
use crate::system::{DofSpace, System, VariableId};
use eyre::{eyre, WrapErr};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::{Debug, Formatter};

/// Tag names of an object, resolved against the system's tag registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TagNames {
    pub vector: Vec<String>,
    pub matrix: Vec<String>,
}

/// Parameters of a physics object as read from an input description.
///
/// ```
/// # use tessera::objects::ObjectParams;
/// let params: ObjectParams = serde_json::from_str(
///     r#"{ "name": "diff", "type": "Diffusion", "variable": "u", "values": { "coefficient": 2.0 } }"#,
/// ).unwrap();
/// assert_eq!(params.type_name, "Diffusion");
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectParams {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub variable: Option<String>,
    /// Further variables by role, e.g. `neighbor_variable`, `lagrange`, `primary`, `coupled`.
    pub coupled: BTreeMap<String, String>,
    pub values: BTreeMap<String, f64>,
    pub boundaries: Vec<BoundaryId>,
    pub subdomains: Option<BTreeSet<SubdomainId>>,
    /// Overrides the object's default tags.
    pub tags: Option<TagNames>,
}

impl ObjectParams {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_variable(mut self, variable: &str) -> Self {
        self.variable = Some(variable.to_string());
        self
    }

    pub fn with_coupled(mut self, role: &str, variable: &str) -> Self {
        self.coupled.insert(role.to_string(), variable.to_string());
        self
    }

    pub fn with_value(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn with_boundaries(mut self, boundaries: impl IntoIterator<Item = BoundaryId>) -> Self {
        self.boundaries = boundaries.into_iter().collect();
        self
    }

    pub fn with_subdomains(mut self, subdomains: impl IntoIterator<Item = SubdomainId>) -> Self {
        self.subdomains = Some(subdomains.into_iter().collect());
        self
    }

    pub fn with_tags(mut self, tags: TagNames) -> Self {
        self.tags = Some(tags);
        self
    }

    fn invalid(&self, message: String) -> AssemblyError {
        AssemblyError::InvalidParameter {
            object: self.name.clone(),
            message,
        }
    }

    /// The primary variable, which must live in `space`.
    pub fn variable(&self, system: &System, space: DofSpace) -> Result<VariableId, AssemblyError> {
        let name = self
            .variable
            .as_deref()
            .ok_or_else(|| self.invalid("missing `variable`".to_string()))?;
        self.resolve(system, name, space)
    }

    /// A further solution variable by role.
    pub fn coupled_variable(&self, system: &System, role: &str) -> Result<VariableId, AssemblyError> {
        let name = self
            .coupled
            .get(role)
            .ok_or_else(|| self.invalid(format!("missing coupled variable `{role}`")))?;
        self.resolve(system, name, DofSpace::Solution)
    }

    fn resolve(&self, system: &System, name: &str, space: DofSpace) -> Result<VariableId, AssemblyError> {
        let var = system.variable_by_name(name)?;
        if system.variable(var)?.kind.space() != space {
            return Err(self.invalid(format!("variable `{name}` is not in the {space:?} space")));
        }
        Ok(var)
    }

    pub fn value(&self, key: &str) -> Result<f64, AssemblyError> {
        self.values
            .get(key)
            .copied()
            .ok_or_else(|| self.invalid(format!("missing value `{key}`")))
    }

    pub fn value_or(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).copied().unwrap_or(default)
    }

    /// Name, tags (`default_tags` unless overridden) and subdomains of the object.
    pub fn base(&self, system: &System, default_tags: ObjectTags) -> Result<ObjectBase, AssemblyError> {
        let tags = match &self.tags {
            None => default_tags,
            Some(names) => ObjectTags {
                vector: names
                    .vector
                    .iter()
                    .map(|name| system.tags().vector_tag(name))
                    .collect::<Result<_, _>>()?,
                matrix: names
                    .matrix
                    .iter()
                    .map(|name| system.tags().matrix_tag(name))
                    .collect::<Result<_, _>>()?,
            },
        };
        Ok(ObjectBase {
            name: self.name.clone(),
            tags,
            subdomains: self.subdomains.clone(),
        })
    }
}

/// A constructed physics object, sorted by capability.
#[derive(Debug)]
pub enum BuiltObject {
    Kernel(Box<dyn Kernel>),
    IntegratedBc(Box<dyn IntegratedBc>),
    InterfaceKernel(Box<dyn InterfaceKernel>),
    MortarConstraint(Box<dyn MortarConstraint>),
    AuxKernel(Box<dyn AuxKernel>),
}

/// All physics objects of a simulation, grouped by the loop that runs them.
#[derive(Debug, Default)]
pub struct ObjectSet {
    pub kernels: Vec<Box<dyn Kernel>>,
    pub integrated_bcs: Vec<Box<dyn IntegratedBc>>,
    pub interface_kernels: Vec<Box<dyn InterfaceKernel>>,
    pub constraints: Vec<Box<dyn MortarConstraint>>,
    pub aux_kernels: Vec<Box<dyn AuxKernel>>,
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: BuiltObject) {
        match object {
            BuiltObject::Kernel(kernel) => self.kernels.push(kernel),
            BuiltObject::IntegratedBc(bc) => self.integrated_bcs.push(bc),
            BuiltObject::InterfaceKernel(kernel) => self.interface_kernels.push(kernel),
            BuiltObject::MortarConstraint(constraint) => self.constraints.push(constraint),
            BuiltObject::AuxKernel(kernel) => self.aux_kernels.push(kernel),
        }
    }

    pub fn with_kernel(mut self, kernel: impl Kernel + 'static) -> Self {
        self.kernels.push(Box::new(kernel));
        self
    }

    pub fn with_integrated_bc(mut self, bc: impl IntegratedBc + 'static) -> Self {
        self.integrated_bcs.push(Box::new(bc));
        self
    }

    pub fn with_interface_kernel(mut self, kernel: impl InterfaceKernel + 'static) -> Self {
        self.interface_kernels.push(Box::new(kernel));
        self
    }

    pub fn with_constraint(mut self, constraint: impl MortarConstraint + 'static) -> Self {
        self.constraints.push(Box::new(constraint));
        self
    }

    pub fn with_aux_kernel(mut self, kernel: impl AuxKernel + 'static) -> Self {
        self.aux_kernels.push(Box::new(kernel));
        self
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
            + self.integrated_bcs.len()
            + self.interface_kernels.len()
            + self.constraints.len()
            + self.aux_kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ObjectFactory = Box<dyn Fn(&System, &ObjectParams) -> eyre::Result<BuiltObject> + Send + Sync>;

/// Maps object type names to factories.
///
/// Built once at setup; there is no global registration.
#[derive(Default)]
pub struct ObjectRegistry {
    factories: BTreeMap<String, ObjectFactory>,
}

impl Debug for ObjectRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every object type of this crate.
    pub fn with_builtin_objects() -> Self {
        let mut registry = Self::new();
        registry.register("Diffusion", |system, params| {
            let base = params.base(system, ObjectTags::nontime())?;
            let var = params.variable(system, DofSpace::Solution)?;
            let coefficient = params.value_or("coefficient", 1.0);
            Ok(BuiltObject::Kernel(Box::new(Diffusion::new(base, var, coefficient))))
        });
        registry.register("BodyForce", |system, params| {
            let base = params.base(system, ObjectTags::nontime())?;
            let var = params.variable(system, DofSpace::Solution)?;
            let value = params.value("value")?;
            Ok(BuiltObject::Kernel(Box::new(BodyForce::new(base, var, value))))
        });
        registry.register("Reaction", |system, params| {
            let base = params.base(system, ObjectTags::time())?;
            let var = params.variable(system, DofSpace::Solution)?;
            let rate = params.value_or("rate", 1.0);
            Ok(BuiltObject::Kernel(Box::new(Reaction::new(base, var, rate))))
        });
        registry.register("NeumannBC", |system, params| {
            let base = params.base(system, ObjectTags::nontime())?;
            let var = params.variable(system, DofSpace::Solution)?;
            if params.boundaries.is_empty() {
                return Err(eyre!("`{}` has no boundaries", params.name));
            }
            let flux = params.value("flux")?;
            let bc = NeumannBc::new(base, var, params.boundaries.clone(), flux);
            Ok(BuiltObject::IntegratedBc(Box::new(bc)))
        });
        registry.register("PenaltyInterface", |system, params| {
            let base = params.base(system, ObjectTags::nontime())?;
            let var = params.variable(system, DofSpace::Solution)?;
            let neighbor_var = if params.coupled.contains_key("neighbor_variable") {
                params.coupled_variable(system, "neighbor_variable")?
            } else {
                var
            };
            let penalty = params.value("penalty")?;
            let kernel = PenaltyInterface::new(base, var, neighbor_var, penalty);
            Ok(BuiltObject::InterfaceKernel(Box::new(kernel)))
        });
        registry.register("EqualValueConstraint", |system, params| {
            let base = params.base(system, ObjectTags::nontime())?;
            let lagrange = params.variable(system, DofSpace::Solution)?;
            let secondary = params.coupled_variable(system, "secondary")?;
            let primary = if params.coupled.contains_key("primary") {
                params.coupled_variable(system, "primary")?
            } else {
                secondary
            };
            let constraint = EqualValueConstraint::new(base, lagrange, secondary, primary);
            Ok(BuiltObject::MortarConstraint(Box::new(constraint)))
        });
        registry.register("ElementAverageAux", |system, params| {
            let base = params.base(system, ObjectTags::default())?;
            let var = params.variable(system, DofSpace::Aux)?;
            let coupled = params.coupled_variable(system, "coupled")?;
            Ok(BuiltObject::AuxKernel(Box::new(ElementAverageAux::new(base, var, coupled))))
        });
        registry.register("ElementVolumeAux", |system, params| {
            let base = params.base(system, ObjectTags::default())?;
            let var = params.variable(system, DofSpace::Aux)?;
            Ok(BuiltObject::AuxKernel(Box::new(ElementVolumeAux::new(base, var))))
        });
        registry
    }

    /// Registers (or replaces) the factory of an object type.
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&System, &ObjectParams) -> eyre::Result<BuiltObject> + Send + Sync + 'static,
    {
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, system: &System, params: &ObjectParams) -> eyre::Result<BuiltObject> {
        let factory = self
            .factories
            .get(&params.type_name)
            .ok_or_else(|| eyre!("unknown object type `{}`", params.type_name))?;
        debug!("Building {} `{}`", params.type_name, params.name);
        factory(system, params).wrap_err_with(|| format!("failed to build {} `{}`", params.type_name, params.name))
    }

    pub fn build_all<'a>(
        &self,
        system: &System,
        params: impl IntoIterator<Item = &'a ObjectParams>,
    ) -> eyre::Result<ObjectSet> {
        let mut objects = ObjectSet::new();
        for params in params {
            objects.add(self.build(system, params)?);
        }
        Ok(objects)
    }
}
