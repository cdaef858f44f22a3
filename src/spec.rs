//! Mockable-surface descriptions and call canonicalisation.
//!
//! A [`Spec`] is derived once, before any interaction, and never mutated: a
//! display name, an optional callable [`Signature`], an asyncness flag, and
//! a lazily navigated map of child specs. Signatures exist so that recorded
//! calls can be *bound*: named arguments addressing positional parameters
//! are folded into their slots, making `m(1, b: 2)` and `m(1, 2)` the same
//! interaction.

use crate::value::{Args, Value};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// An immutable description of a mockable surface.
///
/// Cheap to clone; all clones share one inner description.
#[derive(Clone, Debug)]
pub struct Spec {
    inner: Arc<Inner>,
}

#[derive(Clone, Debug)]
struct Inner {
    name: String,
    kind: SpecKind,
    signature: Option<Signature>,
    is_async: bool,
    children: HashMap<String, Spec>,
    ignore_extra_args: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SpecKind {
    Class,
    Function,
    Bare,
}

impl Spec {
    /// Describes a class-like surface: attribute-navigable, not callable
    /// with a signature of its own.
    pub fn class(name: impl Into<String>) -> Self {
        Spec::with_kind(name.into(), SpecKind::Class, None)
    }

    /// Describes a single callable with an (initially empty) signature.
    pub fn function(name: impl Into<String>) -> Self {
        Spec::with_kind(name.into(), SpecKind::Function, Some(Signature::default()))
    }

    /// Describes a bare name: no signature, any arguments accepted, children
    /// synthesised on first access.
    pub fn bare(name: impl Into<String>) -> Self {
        Spec::with_kind(name.into(), SpecKind::Bare, None)
    }

    fn with_kind(name: String, kind: SpecKind, signature: Option<Signature>) -> Self {
        Spec {
            inner: Arc::new(Inner {
                name,
                kind,
                signature,
                is_async: false,
                children: HashMap::new(),
                ignore_extra_args: false,
            }),
        }
    }

    /// Appends a required positional parameter.
    pub fn param(self, name: impl Into<String>) -> Self {
        self.push_param(Param { name: name.into(), has_default: false, kw_only: false })
    }

    /// Appends a positional parameter that may be omitted.
    pub fn param_with_default(self, name: impl Into<String>) -> Self {
        self.push_param(Param { name: name.into(), has_default: true, kw_only: false })
    }

    /// Appends a required keyword-only parameter.
    pub fn kw_only(self, name: impl Into<String>) -> Self {
        self.push_param(Param { name: name.into(), has_default: false, kw_only: true })
    }

    /// Appends a keyword-only parameter that may be omitted.
    pub fn kw_only_with_default(self, name: impl Into<String>) -> Self {
        self.push_param(Param { name: name.into(), has_default: true, kw_only: true })
    }

    /// Accepts arbitrary extra positional arguments.
    pub fn var_args(self) -> Self {
        self.edit_signature(|signature| signature.var_args = true)
    }

    /// Accepts arbitrary extra named arguments.
    pub fn var_kwargs(self) -> Self {
        self.edit_signature(|signature| signature.var_kwargs = true)
    }

    /// Marks the surface asynchronous: it must be exercised through
    /// [`Spy::call_async`](crate::Spy::call_async).
    pub fn asynchronous(mut self) -> Self {
        self.edit(|inner| inner.is_async = true);
        self
    }

    /// Makes every rehearsal built from this mock tolerate extra arguments
    /// by default.
    pub fn ignore_extra_args(mut self) -> Self {
        self.edit(|inner| inner.ignore_extra_args = true);
        self
    }

    /// Declares a child attribute, keyed by the child spec's name.
    pub fn child(mut self, child: Spec) -> Self {
        self.edit(|inner| {
            inner.children.insert(child.name().to_owned(), child.clone());
        });
        self
    }

    /// Declares a property-like attribute: a plain value slot, read and
    /// written through the attribute-stub API (`get`/`set`/`delete`).
    pub fn property(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.edit(|inner| {
            inner
                .children
                .entry(name.clone())
                .or_insert_with(|| Spec::bare(name));
        });
        self
    }

    fn push_param(self, param: Param) -> Self {
        self.edit_signature(|signature| signature.params.push(param))
    }

    fn edit_signature(mut self, edit: impl FnOnce(&mut Signature)) -> Self {
        let name = self.name().to_owned();
        self.edit(|inner| match &mut inner.signature {
            Some(signature) => edit(signature),
            None => panic!(
                "{}",
                crate::Error::MockSpecInvalid {
                    reason: format!(
                        "`{}` is not a function spec and cannot take parameters",
                        name
                    ),
                }
            ),
        });
        self
    }

    fn edit(&mut self, edit: impl FnOnce(&mut Inner)) {
        edit(Arc::make_mut(&mut self.inner));
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether calls must go through the asynchronous surface.
    pub fn is_async(&self) -> bool {
        self.inner.is_async
    }

    pub(crate) fn signature(&self) -> Option<&Signature> {
        self.inner.signature.as_ref()
    }

    pub(crate) fn ignores_extra_args(&self) -> bool {
        self.inner.ignore_extra_args
    }

    pub(crate) fn has_declared_children(&self) -> bool {
        !self.inner.children.is_empty()
    }

    /// The child spec for `name`, synthesising a bare child when this spec
    /// permits undeclared attributes.
    pub(crate) fn child_spec(&self, name: &str) -> Option<Spec> {
        if let Some(child) = self.inner.children.get(name) {
            return Some(child.clone());
        }
        match self.inner.kind {
            SpecKind::Bare => Some(Spec::bare(name)),
            SpecKind::Class if !self.has_declared_children() => Some(Spec::bare(name)),
            _ => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        if self.inner.name.is_empty() {
            return Err(crate::Error::MockSpecInvalid {
                reason: "a mock needs a non-empty name".into(),
            });
        }
        if self.inner.is_async && self.inner.kind == SpecKind::Class {
            return Err(crate::Error::MockSpecInvalid {
                reason: format!("class `{}` cannot itself be async", self.inner.name),
            });
        }
        Ok(())
    }
}

/// A callable signature: named positional parameters, keyword-only
/// parameters, and optional variadics.
#[derive(Clone, Debug, Default)]
pub(crate) struct Signature {
    params: Vec<Param>,
    var_args: bool,
    var_kwargs: bool,
}

#[derive(Clone, Debug)]
struct Param {
    name: String,
    has_default: bool,
    kw_only: bool,
}

impl Signature {
    /// Binds a call's arguments to this signature, producing the canonical
    /// form used for recording and matching. Named arguments that address
    /// positional parameters are folded into positional slots; trailing
    /// defaulted parameters may be omitted entirely.
    pub fn bind(&self, args: &Args) -> Result<Args, String> {
        let mut positional = args.positional().iter().cloned();
        let mut named: BTreeMap<String, Value> = args
            .named_args()
            .map(|(name, value)| (name.to_owned(), value.clone()))
            .collect();

        let mut bound_positional: Vec<Value> = Vec::new();
        let mut bound_named: BTreeMap<String, Value> = BTreeMap::new();
        // once a defaulted parameter is omitted, later parameters can only
        // arrive by name
        let mut positional_done = false;

        for param in self.params.iter().filter(|param| !param.kw_only) {
            let next_positional =
                if positional_done { None } else { positional.next() };
            if let Some(value) = next_positional {
                if named.contains_key(&param.name) {
                    return Err(format!(
                        "got multiple values for argument `{}`",
                        param.name
                    ));
                }
                bound_positional.push(value);
                continue;
            }
            if let Some(value) = named.remove(&param.name) {
                if positional_done {
                    bound_named.insert(param.name.clone(), value);
                } else {
                    bound_positional.push(value);
                }
            } else if param.has_default {
                positional_done = true;
            } else {
                return Err(format!("missing required argument `{}`", param.name));
            }
        }

        for param in self.params.iter().filter(|param| param.kw_only) {
            if let Some(value) = named.remove(&param.name) {
                bound_named.insert(param.name.clone(), value);
            } else if !param.has_default {
                return Err(format!(
                    "missing required keyword argument `{}`",
                    param.name
                ));
            }
        }

        let extra_positional: Vec<Value> = positional.collect();
        if !extra_positional.is_empty() {
            if !self.var_args {
                return Err(format!(
                    "takes {} positional argument(s) but {} were given",
                    self.params.iter().filter(|param| !param.kw_only).count(),
                    args.positional().len()
                ));
            }
            bound_positional.extend(extra_positional);
        }

        if !named.is_empty() {
            if !self.var_kwargs {
                let name = named.keys().next().expect("checked non-empty");
                return Err(format!("got an unexpected keyword argument `{}`", name));
            }
            bound_named.extend(named);
        }

        Ok(Args::from_parts(bound_positional, bound_named))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn add() -> Spec {
        Spec::function("add").param("a").param("b")
    }

    fn bind(spec: &Spec, args: Args) -> Result<Args, String> {
        spec.signature().expect("function spec").bind(&args)
    }

    fn rendered(result: Result<Args, String>) -> String {
        format!("{:?}", result.expect("should bind"))
    }

    #[test]
    fn named_args_fold_into_positional_slots() {
        let spec = add();
        assert_eq!(rendered(bind(&spec, args![1, 2])), "(1, 2)");
        assert_eq!(rendered(bind(&spec, args![1; b: 2])), "(1, 2)");
        assert_eq!(rendered(bind(&spec, args![; a: 1, b: 2])), "(1, 2)");
    }

    #[test]
    fn missing_required_arguments_fail_to_bind() {
        let err = bind(&add(), args![1]).unwrap_err();
        assert!(err.contains("`b`"));
    }

    #[test]
    fn duplicate_arguments_fail_to_bind() {
        let err = bind(&add(), args![1, 2; a: 3]).unwrap_err();
        assert!(err.contains("multiple values"));
    }

    #[test]
    fn extra_arguments_fail_without_variadics() {
        assert!(bind(&add(), args![1, 2, 3]).is_err());
        assert!(bind(&add(), args![1, 2; c: 3]).is_err());
    }

    #[test]
    fn variadics_accept_the_excess() {
        let spec = Spec::function("f").param("a").var_args().var_kwargs();
        assert_eq!(rendered(bind(&spec, args![1, 2, 3; x: 4])), "(1, 2, 3, x: 4)");
    }

    #[test]
    fn omitted_defaults_leave_no_hole() {
        let spec = Spec::function("f").param("a").param_with_default("b");
        assert_eq!(rendered(bind(&spec, args![1])), "(1)");
        assert_eq!(rendered(bind(&spec, args![1, 2])), "(1, 2)");
    }

    #[test]
    fn params_after_an_omitted_default_bind_by_name() {
        let spec = Spec::function("f")
            .param_with_default("a")
            .param_with_default("b");
        assert_eq!(rendered(bind(&spec, args![; b: 2])), "(b: 2)");
    }

    #[test]
    fn kw_only_params_never_bind_positionally() {
        let spec = Spec::function("f").param("a").kw_only("flag");
        assert_eq!(rendered(bind(&spec, args![1; flag: true])), "(1, flag: true)");
        assert!(bind(&spec, args![1, true]).is_err());
    }

    #[test]
    fn class_specs_reject_parameters() {
        let result = std::panic::catch_unwind(|| Spec::class("c").param("a"));
        assert!(result.is_err());
    }

    #[test]
    fn child_lookup_synthesises_for_bare_specs_only() {
        let bare = Spec::bare("thing");
        assert!(bare.child_spec("anything").is_some());

        let class = Spec::class("Db").child(Spec::function("connect"));
        assert!(class.child_spec("connect").is_some());
        assert!(class.child_spec("fetch").is_none());
    }

    #[test]
    fn validation_catches_unusable_specs() {
        assert!(Spec::bare("").validate().is_err());
        assert!(Spec::function("f").asynchronous().validate().is_ok());
    }
}
