//! [`DefPoolBuilder`] (mutable schema construction) and [`DefPool`] (the
//! frozen result), plus the [`SymbolTable`] view used to look defs up by
//! fully-qualified name.
//!
//! Grounded in `descriptor_pool.rs`'s two-pass "build tables, then patch
//! cross-references" shape, generalized per spec.md §4.D's six-step "Adding
//! defs" algorithm. This builder implements the single-generation case (all
//! defs are mutable and freeze together); re-opening an already-frozen pool
//! to add more defs — the steps in §4.D about duplicating existing frozen
//! messages into the add-set — isn't supported, since `DefPool` has no
//! mutation API at all once frozen. See `DESIGN.md` for that decision.

extern crate alloc;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use super::enum_::EnumDefData;
use super::field::{FieldDefData, SubDefRef};
use super::file::FileDefData;
use super::message::{self, MessageDefData};
use super::oneof::OneofDefData;
use super::{DefId, EnumId, FieldId, FileId, MessageId, OneofId, Syntax};
use crate::error::DefError;
use crate::hash::StrTable;
use crate::refcount::{strongly_connected_components, GroupId, RefGraph};

const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;
const MAX_FIELDS_PER_MESSAGE: u32 = u16::MAX as u32;

pub struct DefPoolBuilder {
    pub(super) messages: Vec<MessageDefData>,
    pub(super) fields: Vec<FieldDefData>,
    pub(super) oneofs: Vec<OneofDefData>,
    pub(super) enums: Vec<EnumDefData>,
    pub(super) files: Vec<FileDefData>,
    names: StrTable<DefId>,
}

impl DefPoolBuilder {
    pub fn new() -> Self {
        DefPoolBuilder {
            messages: Vec::new(),
            fields: Vec::new(),
            oneofs: Vec::new(),
            enums: Vec::new(),
            files: Vec::new(),
            names: StrTable::new(),
        }
    }

    /// Step 1 of spec.md §4.D: reject anonymous or duplicate fully-qualified
    /// names before the def is installed.
    fn register_name(&mut self, name: &str, id: DefId) -> Result<(), DefError> {
        if name.is_empty() {
            return Err(DefError::AnonymousDef);
        }
        if self.names.get(name).is_some() {
            return Err(DefError::DuplicateName(String::from(name)));
        }
        log::trace!("registering def {name:?}");
        self.names.insert(name, id);
        Ok(())
    }

    pub fn add_file(
        &mut self,
        name: impl Into<String>,
        package: impl Into<String>,
        syntax: Syntax,
    ) -> Result<FileId, DefError> {
        let package = package.into();
        let name = name.into();
        let id = FileId(self.files.len() as u32);
        self.register_name(&format!("file:{name}"), DefId::File(id))?;
        self.files.push(FileDefData {
            name,
            package,
            dependencies: Vec::new(),
            top_messages: Vec::new(),
            top_enums: Vec::new(),
            syntax,
        });
        Ok(id)
    }

    pub fn add_message(
        &mut self,
        file: FileId,
        full_name: impl Into<String>,
    ) -> Result<message::MessageDefBuilder<'_>, DefError> {
        let full_name = full_name.into();
        let id = MessageId(self.messages.len() as u32);
        self.register_name(&full_name, DefId::Message(id))?;
        let syntax = self.files[file.0 as usize].syntax;
        self.messages.push(MessageDefData {
            full_name,
            file,
            fields: Vec::new(),
            oneofs: Vec::new(),
            syntax,
            is_map_entry: false,
            extension_ranges: Vec::new(),
            instance_size: 0,
            hasbit_bytes: 0,
            hasbit_offset: 0,
            submsg_field_count: 0,
            required_count: 0,
        });
        self.files[file.0 as usize].top_messages.push(id);
        Ok(message::MessageDefBuilder { pool: self, id })
    }

    pub fn add_enum(
        &mut self,
        file: FileId,
        full_name: impl Into<String>,
    ) -> Result<super::EnumDefBuilder<'_>, DefError> {
        let full_name = full_name.into();
        let id = EnumId(self.enums.len() as u32);
        self.register_name(&full_name, DefId::Enum(id))?;
        self.enums.push(EnumDefData {
            full_name,
            file,
            values: Vec::new(),
            default_value: 0,
            closed: true,
        });
        self.files[file.0 as usize].top_enums.push(id);
        Ok(super::EnumDefBuilder { pool: self, id })
    }

    fn resolve_symbolic(&self, base: &str, reference: &str) -> Option<DefId> {
        if let Some(absolute) = reference.strip_prefix('.') {
            return self.names.get(absolute).copied();
        }
        let mut scope = base;
        loop {
            let candidate =
                if scope.is_empty() { String::from(reference) } else { format!("{scope}.{reference}") };
            if let Some(id) = self.names.get(&candidate) {
                return Some(*id);
            }
            if scope.is_empty() {
                return None;
            }
            scope = match scope.rfind('.') {
                Some(pos) => &scope[..pos],
                None => "",
            };
        }
    }

    /// Step 4 of spec.md §4.D: resolve every field's symbolic subdef name.
    fn resolve_subdefs(&mut self) -> Result<(), DefError> {
        for field_idx in 0..self.fields.len() {
            let (needs_resolution, owning_message, reference) = {
                let f = &self.fields[field_idx];
                match &f.subdef {
                    SubDefRef::Symbolic(name) => (true, f.message, name.clone()),
                    _ => (false, f.message, String::new()),
                }
            };
            if !needs_resolution {
                continue;
            }
            let base = self.messages[owning_message.0 as usize].full_name.clone();
            let field_name = self.fields[field_idx].name.clone();
            let resolved = self.resolve_symbolic(&base, &reference).ok_or_else(|| DefError::UnresolvedReference {
                from: format!("{base}.{field_name}"),
                reference: reference.clone(),
            })?;
            self.fields[field_idx].subdef = match resolved {
                DefId::Message(id) => SubDefRef::Message(id),
                DefId::Enum(id) => SubDefRef::Enum(id),
                _ => {
                    return Err(DefError::UnresolvedReference {
                        from: format!("{base}.{field_name}"),
                        reference,
                    })
                }
            };
        }
        Ok(())
    }

    fn validate_field_numbers(&self) -> Result<(), DefError> {
        for msg in &self.messages {
            if msg.fields.len() as u32 > MAX_FIELDS_PER_MESSAGE {
                return Err(DefError::TooManyFields { message: msg.full_name.clone(), max: MAX_FIELDS_PER_MESSAGE });
            }
            let mut seen: Vec<u32> = Vec::with_capacity(msg.fields.len());
            for &fid in &msg.fields {
                let f = &self.fields[fid.0 as usize];
                if f.number == 0 || f.number > MAX_FIELD_NUMBER {
                    return Err(DefError::FieldNumberOutOfRange(f.number));
                }
                if seen.contains(&f.number) {
                    return Err(DefError::DuplicateFieldNumber {
                        message: msg.full_name.clone(),
                        field: f.name.clone(),
                        number: f.number,
                    });
                }
                seen.push(f.number);
            }
        }
        Ok(())
    }

    /// Builds the message-level ref2 edge list used for SCC decomposition:
    /// an edge from message A to message B exists whenever A has a field
    /// whose resolved subdef is B (spec.md §4.C).
    fn message_ref2_edges(&self) -> Vec<Vec<u32>> {
        let mut edges = alloc::vec![Vec::new(); self.messages.len()];
        for (msg_idx, msg) in self.messages.iter().enumerate() {
            for &fid in &msg.fields {
                if let SubDefRef::Message(target) = &self.fields[fid.0 as usize].subdef {
                    edges[msg_idx].push(target.0);
                }
            }
        }
        edges
    }

    /// Step 5/freeze: validates, resolves, computes layout and SCC groups,
    /// and consumes the builder into an immutable [`DefPool`].
    pub fn freeze(mut self) -> Result<DefPool, DefError> {
        log::debug!("freezing def pool: {} messages, {} fields", self.messages.len(), self.fields.len());
        self.validate_field_numbers()?;
        self.resolve_subdefs()?;

        let edges = self.message_ref2_edges();
        let scc_of = strongly_connected_components(&edges);

        let graph = RefGraph::new();
        let mut groups: Vec<GroupId> = Vec::with_capacity(self.messages.len());
        let num_sccs = scc_of.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut scc_groups: Vec<GroupId> = Vec::with_capacity(num_sccs as usize);
        for _ in 0..num_sccs {
            scc_groups.push(graph.new_singleton());
        }
        for &scc in &scc_of {
            groups.push(scc_groups[scc as usize]);
        }

        for idx in 0..self.messages.len() {
            message::compute_layout(&mut self.messages, &mut self.fields, &mut self.oneofs, MessageId(idx as u32))?;
        }

        log::debug!("def pool frozen into {} refcount groups", num_sccs);
        Ok(DefPool {
            messages: self.messages,
            fields: self.fields,
            oneofs: self.oneofs,
            enums: self.enums,
            files: self.files,
            names: self.names,
            groups,
            _graph: graph,
        })
    }
}

impl Default for DefPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The frozen result of [`DefPoolBuilder::freeze`]. `Send + Sync`: every
/// field is either plain owned data or an index, and no interior mutability
/// survives freezing (spec.md §5).
pub struct DefPool {
    pub(super) messages: Vec<MessageDefData>,
    pub(super) fields: Vec<FieldDefData>,
    pub(super) oneofs: Vec<OneofDefData>,
    pub(super) enums: Vec<EnumDefData>,
    pub(super) files: Vec<FileDefData>,
    names: StrTable<DefId>,
    groups: Vec<GroupId>,
    /// Kept alive so the groups recorded in `groups` stay valid; frozen defs
    /// don't currently expose ref/unref (no consumer needs partial teardown
    /// of a def pool yet), but the refcount machinery is load-bearing for the
    /// SCC computation above and documented here rather than discarded.
    _graph: RefGraph,
}

unsafe impl Send for DefPool {}
unsafe impl Sync for DefPool {}

impl DefPool {
    pub fn message(&self, id: MessageId) -> message::MessageDef<'_> {
        message::MessageDef { pool: self, id }
    }

    pub fn enum_(&self, id: EnumId) -> super::EnumDef<'_> {
        super::EnumDef { pool: self, id }
    }

    pub fn oneof(&self, id: OneofId) -> super::OneofDef<'_> {
        super::OneofDef { pool: self, id }
    }

    pub fn field(&self, id: FieldId) -> super::FieldDef<'_> {
        super::FieldDef { pool: self, id }
    }

    pub fn file(&self, id: FileId) -> super::FileDef<'_> {
        super::FileDef { pool: self, id }
    }

    pub fn refcount_group(&self, id: MessageId) -> GroupId {
        self.groups[id.0 as usize]
    }

    pub fn symbol_table(&self) -> SymbolTable<'_> {
        SymbolTable { pool: self }
    }
}

/// Name → def lookup over a frozen [`DefPool`] (spec.md §6 "Symbol-table API").
#[derive(Clone, Copy)]
pub struct SymbolTable<'p> {
    pool: &'p DefPool,
}

impl<'p> SymbolTable<'p> {
    pub fn lookup_message(&self, full_name: &str) -> Option<message::MessageDef<'p>> {
        match self.pool.names.get(full_name)? {
            DefId::Message(id) => Some(self.pool.message(*id)),
            _ => None,
        }
    }

    pub fn lookup_enum(&self, full_name: &str) -> Option<super::EnumDef<'p>> {
        match self.pool.names.get(full_name)? {
            DefId::Enum(id) => Some(self.pool.enum_(*id)),
            _ => None,
        }
    }

    pub fn iter_messages(&self) -> impl Iterator<Item = message::MessageDef<'p>> + '_ {
        let pool = self.pool;
        (0..pool.messages.len()).map(move |i| pool.message(MessageId(i as u32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, Label};

    fn build_simple_pool() -> DefPool {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("test.proto", "pkg", Syntax::Proto3).unwrap();
        {
            let mut child = b.add_message(file, "pkg.Child").unwrap();
            child.add_field("value", 1, Label::Optional, FieldType::Int32);
        }
        {
            let mut parent = b.add_message(file, "pkg.Parent").unwrap();
            parent
                .add_field("child", 1, Label::Optional, FieldType::Message)
                .set_subdef_name("pkg.Child");
            parent.add_field("name", 2, Label::Optional, FieldType::String);
            parent.add_field("tags", 3, Label::Repeated, FieldType::String);
        }
        b.freeze().unwrap()
    }

    #[test]
    fn resolves_subdef_and_computes_layout() {
        let pool = build_simple_pool();
        let st = pool.symbol_table();
        let parent = st.lookup_message("pkg.Parent").unwrap();
        let child_field = parent.field_by_number(1).unwrap();
        assert_eq!(child_field.message_subdef().unwrap().full_name(), "pkg.Child");
        assert!(parent.instance_size() > 0);
        assert_eq!(parent.submsg_field_count(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("test.proto", "pkg", Syntax::Proto3).unwrap();
        b.add_message(file, "pkg.Dup").unwrap();
        let err = b.add_message(file, "pkg.Dup").unwrap_err();
        assert!(matches!(err, DefError::DuplicateName(_)));
    }

    #[test]
    fn unresolved_subdef_fails_freeze() {
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("test.proto", "pkg", Syntax::Proto3).unwrap();
        {
            let mut m = b.add_message(file, "pkg.M").unwrap();
            m.add_field("x", 1, Label::Optional, FieldType::Message).set_subdef_name("pkg.DoesNotExist");
        }
        assert!(matches!(b.freeze(), Err(DefError::UnresolvedReference { .. })));
    }

    #[test]
    fn cyclic_message_refs_freeze_into_shared_group() {
        // A references B and B references A: a genuine cycle, only
        // resolvable because subdef names are resolved at freeze time, after
        // every message's name is already registered.
        let mut b = DefPoolBuilder::new();
        let file = b.add_file("cyclic.proto", "pkg", Syntax::Proto3).unwrap();
        {
            let mut a = b.add_message(file, "pkg.A").unwrap();
            a.add_field("b", 1, Label::Optional, FieldType::Message).set_subdef_name("pkg.B");
        }
        {
            let mut bb = b.add_message(file, "pkg.B").unwrap();
            bb.add_field("a", 1, Label::Optional, FieldType::Message).set_subdef_name("pkg.A");
        }
        let pool = b.freeze().unwrap();
        let st = pool.symbol_table();
        let a = st.lookup_message("pkg.A").unwrap();
        let bdef = st.lookup_message("pkg.B").unwrap();
        assert_eq!(pool.refcount_group(a.id()), pool.refcount_group(bdef.id()));
    }
}
