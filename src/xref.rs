use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ir::{CallKind, CallSite, Class};

/// Unique identifier for a method among the scanned classes.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct MethodId {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Directed call edge between caller and callee.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct CallEdge {
    pub(crate) caller: MethodId,
    pub(crate) callee: MethodId,
    pub(crate) kind: CallKind,
    pub(crate) offset: u32,
}

/// Call graph built from CHA over the scanned classes.
#[derive(Clone, Debug, Default)]
pub(crate) struct CallGraph {
    pub(crate) edges: BTreeSet<CallEdge>,
}

impl CallGraph {
    /// Callers of each method, one `(caller, offset)` per call site, in caller order.
    pub(crate) fn reverse_usages(&self) -> BTreeMap<MethodId, Vec<(MethodId, u32)>> {
        let mut usages: BTreeMap<MethodId, Vec<(MethodId, u32)>> = BTreeMap::new();
        for edge in &self.edges {
            usages
                .entry(edge.callee.clone())
                .or_default()
                .push((edge.caller.clone(), edge.offset));
        }
        usages
    }
}

/// Build a call graph using a CHA baseline.
pub(crate) fn build_call_graph(classes: &[Class]) -> CallGraph {
    let hierarchy = Hierarchy::new(classes);
    let methods = index_methods(classes);
    let mut edges = BTreeSet::new();
    for class in classes {
        for method in &class.methods {
            let caller = MethodId {
                class_name: class.name.clone(),
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            };
            for call in &method.calls {
                for callee in resolve_targets(call, &hierarchy, &methods) {
                    edges.insert(CallEdge {
                        caller: caller.clone(),
                        callee,
                        kind: call.kind,
                        offset: call.offset,
                    });
                }
            }
        }
    }
    CallGraph { edges }
}

fn resolve_targets(
    call: &CallSite,
    hierarchy: &Hierarchy,
    methods: &BTreeSet<MethodId>,
) -> Vec<MethodId> {
    let candidate = |class_name: &str| MethodId {
        class_name: class_name.to_string(),
        name: call.name.clone(),
        descriptor: call.descriptor.clone(),
    };
    let mut targets = Vec::new();
    // The referenced owner may inherit the method rather than declare it.
    if let Some(declaring) = hierarchy
        .self_and_supers(&call.owner)
        .into_iter()
        .map(|class_name| candidate(&class_name))
        .find(|id| methods.contains(id))
    {
        targets.push(declaring);
    }
    if matches!(call.kind, CallKind::Virtual | CallKind::Interface) {
        for class_name in hierarchy.descendants(&call.owner) {
            let id = candidate(&class_name);
            if methods.contains(&id) && !targets.contains(&id) {
                targets.push(id);
            }
        }
    }
    targets
}

/// Subtype edges from both `extends` and `implements`.
struct Hierarchy {
    supers: BTreeMap<String, String>,
    children: BTreeMap<String, Vec<String>>,
}

impl Hierarchy {
    fn new(classes: &[Class]) -> Self {
        let mut supers = BTreeMap::new();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for class in classes {
            if let Some(super_name) = &class.super_name {
                supers.insert(class.name.clone(), super_name.clone());
                children
                    .entry(super_name.clone())
                    .or_default()
                    .push(class.name.clone());
            }
            for interface in &class.interfaces {
                children
                    .entry(interface.clone())
                    .or_default()
                    .push(class.name.clone());
            }
        }
        for descendants in children.values_mut() {
            descendants.sort();
            descendants.dedup();
        }
        Self { supers, children }
    }

    fn self_and_supers(&self, class_name: &str) -> Vec<String> {
        let mut chain = vec![class_name.to_string()];
        let mut current = class_name;
        while let Some(super_name) = self.supers.get(current) {
            if chain.contains(super_name) {
                break;
            }
            chain.push(super_name.clone());
            current = super_name;
        }
        chain
    }

    /// Transitive subtypes, excluding the class itself.
    fn descendants(&self, class_name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([class_name.to_string()]);
        while let Some(current) = queue.pop_front() {
            let Some(children) = self.children.get(&current) else {
                continue;
            };
            for child in children {
                if child != class_name && seen.insert(child.clone()) {
                    queue.push_back(child.clone());
                }
            }
        }
        seen
    }
}

fn index_methods(classes: &[Class]) -> BTreeSet<MethodId> {
    classes
        .iter()
        .flat_map(|class| {
            class.methods.iter().map(|method| MethodId {
                class_name: class.name.clone(),
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            })
        })
        .collect()
}
