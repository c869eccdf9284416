use smallvec::SmallVec;

use crate::{
    abstract_value::AbstractId,
    generator::{Entry, Generator},
    heap::{Descriptor, PropertyKey},
    resource::ResourceTracker,
    tracer::EvalTracer,
    value::Value,
};

use super::Residualizer;

impl<T: ResourceTracker, Tr: EvalTracer> Residualizer<'_, T, Tr> {
    pub(crate) fn visit_roots(&mut self) {
        // Every declared abstract, including those in delayed entries, is
        // registered first so availability checks can tell entry-declared
        // abstracts from inline ones.
        let root = self.root.clone();
        register_declared(&root, &mut self.entry_declared);

        self.visit_generator(&root);

        // Global properties created or changed by the program.
        let global = self.realm.global_object;
        let props: Vec<(PropertyKey, Descriptor)> = self
            .realm
            .heap
            .get(global)
            .properties
            .iter()
            .map(|(key, desc)| (*key, *desc))
            .collect();
        for (key, desc) in props {
            if self.realm.initial_global_keys.contains(&key) {
                continue;
            }
            self.visit_descriptor(&desc);
        }

        if let Some(value) = self.completion {
            self.visit_value(value);
        }
    }

    pub(crate) fn visit_generator(&mut self, generator: &Generator) {
        for entry in &generator.entries {
            if entry.pure
                && let Some(declared) = entry.declared
                && !self.required.contains(&declared)
            {
                self.delayed.insert(declared, entry.clone());
                continue;
            }
            self.visit_entry(entry);
        }
    }

    fn visit_entry(&mut self, entry: &Entry) {
        if let Some(declared) = entry.declared {
            self.required.insert(declared);
        }
        for arg in &entry.args {
            self.visit_value(*arg);
        }
        for child in &entry.children {
            self.visit_generator(child);
        }
    }

    pub(crate) fn visit_value(&mut self, value: Value) {
        match value {
            Value::Object(id) => {
                *self.ref_counts.entry(id).or_insert(0) += 1;
                if !self.visited_objects.insert(id) {
                    return;
                }
                let data = self.realm.heap.get(id);
                if data.intrinsic_path.is_some() || !self.realm.is_fresh(id) {
                    // Host and intrinsic objects exist already; nothing to
                    // materialize behind them.
                    return;
                }
                if let Some(proto) = data.proto {
                    self.visit_value(Value::Object(proto));
                }
                let descs: Vec<Descriptor> = self.realm.heap.get(id).properties.values().copied().collect();
                for desc in descs {
                    self.visit_descriptor(&desc);
                }
            }
            Value::Abstract(id) => self.mark_required(id),
            _ => {}
        }
    }

    fn visit_descriptor(&mut self, desc: &Descriptor) {
        match desc {
            Descriptor::Data { value, .. } => self.visit_value(*value),
            Descriptor::Accessor { get, set, .. } => {
                if let Some(get) = get {
                    self.visit_value(*get);
                }
                if let Some(set) = set {
                    self.visit_value(*set);
                }
            }
        }
    }

    /// Demands an abstract value: revokes a pending delay and visits the
    /// value's own argument DAG.
    pub(crate) fn mark_required(&mut self, id: AbstractId) {
        if !self.required.insert(id) {
            return;
        }
        if let Some(entry) = self.delayed.remove(&id) {
            self.visit_entry(&entry);
        }
        let args: SmallVec<[Value; 4]> = self.realm.abstracts.get(id).args.clone();
        for arg in args {
            self.visit_value(arg);
        }
    }
}

/// Registers every entry-declared abstract in the generator tree.
fn register_declared(generator: &Generator, out: &mut ahash::AHashSet<AbstractId>) {
    for entry in &generator.entries {
        if let Some(declared) = entry.declared {
            out.insert(declared);
        }
        for child in &entry.children {
            register_declared(child, out);
        }
    }
}
