extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use super::FileId;
use crate::schema::pool::{DefPool, DefPoolBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub(super) u32);

pub(super) struct EnumDefData {
    pub(super) full_name: String,
    pub(super) file: FileId,
    pub(super) values: Vec<(String, i32)>,
    pub(super) default_value: i32,
    pub(super) closed: bool,
}

pub struct EnumDefBuilder<'b> {
    pub(super) pool: &'b mut DefPoolBuilder,
    pub(super) id: EnumId,
}

impl<'b> EnumDefBuilder<'b> {
    pub fn add_value(self, name: impl Into<String>, number: i32) -> Self {
        let data = &mut self.pool.enums[self.id.0 as usize];
        if data.values.is_empty() {
            // spec.md §3 EnumDef: "default value (defaults to the first
            // declared value unless overridden)".
            data.default_value = number;
        }
        data.values.push((name.into(), number));
        self
    }

    pub fn set_default_value(self, number: i32) -> Self {
        self.pool.enums[self.id.0 as usize].default_value = number;
        self
    }

    pub fn set_closed(self, closed: bool) -> Self {
        self.pool.enums[self.id.0 as usize].closed = closed;
        self
    }

    pub fn id(&self) -> EnumId {
        self.id
    }
}

#[derive(Clone, Copy)]
pub struct EnumDef<'p> {
    pub(crate) pool: &'p DefPool,
    pub(crate) id: EnumId,
}

impl<'p> EnumDef<'p> {
    fn data(&self) -> &'p EnumDefData {
        &self.pool.enums[self.id.0 as usize]
    }

    pub fn id(&self) -> EnumId {
        self.id
    }

    pub fn full_name(&self) -> &'p str {
        &self.data().full_name
    }

    pub fn default_value(&self) -> i32 {
        self.data().default_value
    }

    pub fn is_closed(&self) -> bool {
        self.data().closed
    }

    pub fn value_by_number(&self, number: i32) -> Option<&'p str> {
        self.data().values.iter().find(|(_, n)| *n == number).map(|(name, _)| name.as_str())
    }

    pub fn value_by_name(&self, name: &str) -> Option<i32> {
        self.data().values.iter().find(|(n, _)| n == name).map(|(_, number)| *number)
    }

    pub fn values(&self) -> impl Iterator<Item = (&'p str, i32)> {
        self.data().values.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl core::fmt::Debug for EnumDef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EnumDef").field("full_name", &self.full_name()).finish()
    }
}
