extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use super::{FieldId, MessageId};
use crate::schema::pool::DefPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OneofId(pub(super) u32);

pub(super) struct OneofDefData {
    pub(super) name: String,
    pub(super) message: MessageId,
    pub(super) fields: Vec<FieldId>,
    /// proto3 singular field modeled as a one-field synthetic oneof
    /// (spec.md §3 OneofDef: "synthetic flag").
    pub(super) synthetic: bool,
    /// Byte offset of this oneof's case slot within the message, assigned by
    /// `MessageDefBuilder::compute_layout`.
    pub(super) case_offset: u32,
}

#[derive(Clone, Copy)]
pub struct OneofDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) id: OneofId,
}

impl<'p> OneofDef<'p> {
    fn data(&self) -> &'p OneofDefData {
        &self.pool.oneofs[self.id.0 as usize]
    }

    pub fn id(&self) -> OneofId {
        self.id
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn is_synthetic(&self) -> bool {
        self.data().synthetic
    }

    pub fn containing_message(&self) -> super::MessageDef<'p> {
        super::MessageDef { pool: self.pool, id: self.data().message }
    }

    pub fn fields(&self) -> impl Iterator<Item = super::FieldDef<'p>> + 'p {
        let pool = self.pool;
        self.data().fields.iter().map(move |&id| super::FieldDef { pool, id })
    }

    pub fn field_by_number(&self, number: u32) -> Option<super::FieldDef<'p>> {
        self.fields().find(|f| f.number() == number)
    }

    /// Byte offset of the case slot that records which member is set
    /// (spec.md §3: "oneof selector word... zero = unset").
    pub fn case_offset(&self) -> u32 {
        self.data().case_offset
    }
}

impl core::fmt::Debug for OneofDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OneofDef").field("name", &self.name()).finish()
    }
}
