extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use super::{EnumId, MessageId, Syntax};
use crate::schema::pool::DefPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub(super) u32);

pub(super) struct FileDefData {
    pub(super) name: String,
    pub(super) package: String,
    pub(super) dependencies: Vec<FileId>,
    pub(super) top_messages: Vec<MessageId>,
    pub(super) top_enums: Vec<EnumId>,
    pub(super) syntax: Syntax,
}

#[derive(Clone, Copy)]
pub struct FileDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) id: FileId,
}

impl<'p> FileDef<'p> {
    fn data(&self) -> &'p FileDefData {
        &self.pool.files[self.id.0 as usize]
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn name(&self) -> &'p str {
        &self.data().name
    }

    pub fn package(&self) -> &'p str {
        &self.data().package
    }

    pub fn syntax(&self) -> Syntax {
        self.data().syntax
    }

    pub fn dependencies(&self) -> impl Iterator<Item = FileDef<'p>> + 'p {
        let pool = self.pool;
        self.data().dependencies.iter().map(move |&id| FileDef { pool, id })
    }

    pub fn top_level_messages(&self) -> impl Iterator<Item = super::MessageDef<'p>> + 'p {
        let pool = self.pool;
        self.data().top_messages.iter().map(move |&id| super::MessageDef { pool, id })
    }

    pub fn top_level_enums(&self) -> impl Iterator<Item = super::EnumDef<'p>> + 'p {
        let pool = self.pool;
        self.data().top_enums.iter().map(move |&id| super::EnumDef { pool, id })
    }
}

impl core::fmt::Debug for FileDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileDef").field("name", &self.name()).finish()
    }
}
