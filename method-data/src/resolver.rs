//! Resolution of raw klass/method addresses into named, identity-stable handles.
//!
//! Profiles embed raw `Klass*` and `Method*` values. An [`ObjectResolver`] turns them into
//! [`Klass`] and [`Method`] handles; resolving the same address twice must produce the same
//! handle, which both resolvers here guarantee through an address-keyed [`Interner`].

use crate::address::Address;
use crate::memory::MemoryReader;
use crate::schema::{Endian, Field, SchemaError, TypeSchema};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

#[derive(Debug, PartialEq, Eq)]
struct KlassInfo {
    address: Address,
    name: String,
}

/// Handle to a class in the target, e.g. `java/lang/String`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Klass(Rc<KlassInfo>);

impl Klass {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Self(Rc::new(KlassInfo {
            address,
            name: name.into(),
        }))
    }

    pub fn address(&self) -> Address {
        self.0.address
    }

    /// Internal (slash separated) class name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether both handles came from the same interned entry.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Klass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct MethodInfo {
    address: Address,
    holder: String,
    name: String,
    signature: String,
}

/// Handle to a method in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method(Rc<MethodInfo>);

impl Method {
    pub fn new(
        address: Address,
        holder: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self(Rc::new(MethodInfo {
            address,
            holder: holder.into(),
            name: name.into(),
            signature: signature.into(),
        }))
    }

    pub fn address(&self) -> Address {
        self.0.address
    }

    pub fn holder(&self) -> &str {
        &self.0.holder
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn signature(&self) -> &str {
        &self.0.signature
    }

    /// `<holder> <name> <signature>`, the form replay files identify methods by.
    pub fn replay_name(&self) -> String {
        format!("{} {} {}", self.holder(), self.name(), self.signature())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.holder(), self.name(), self.signature())
    }
}

/// Turns raw addresses found in a profile into handles.
///
/// `None` means "absent": the address is null or could not be resolved. That is the normal state
/// for unused profile rows and is never treated as an error.
pub trait ObjectResolver {
    fn klass(&self, address: Address) -> Option<Klass>;

    fn method(&self, address: Address) -> Option<Method>;
}

impl<R: ObjectResolver + ?Sized> ObjectResolver for &R {
    fn klass(&self, address: Address) -> Option<Klass> {
        (**self).klass(address)
    }

    fn method(&self, address: Address) -> Option<Method> {
        (**self).method(address)
    }
}

/// Address-keyed cache of resolved handles. Failed lookups are cached too, so a walk that
/// resolves an address twice always sees the same answer.
#[derive(Debug)]
pub struct Interner<T> {
    entries: RefCell<HashMap<Address, Option<T>>>,
}

impl<T: Clone> Interner<T> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn get_or_insert_with<F>(&self, address: Address, resolve: F) -> Option<T>
    where
        F: FnOnce(Address) -> Option<T>,
    {
        let address = address.non_null()?;
        if let Some(entry) = self.entries.borrow().get(&address) {
            return entry.clone();
        }
        let value = resolve(address);
        self.entries.borrow_mut().insert(address, value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<T: Clone> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSymbol {
    pub holder: String,
    pub name: String,
    pub signature: String,
}

/// On-disk form of a [`SymbolTable`]; keys are `0x`-prefixed addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SymbolFile {
    #[serde(default)]
    klasses: BTreeMap<String, String>,
    #[serde(default)]
    methods: BTreeMap<String, MethodSymbol>,
}

#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    #[error("invalid address {0:?} in symbol table")]
    Address(String),

    #[error("malformed symbol table")]
    Json(#[from] serde_json::Error),

    #[error("unable to read symbol table")]
    Io(#[from] std::io::Error),
}

/// Resolver over names that were captured alongside the memory image.
#[derive(Debug, Default)]
pub struct SymbolTable {
    klass_names: HashMap<Address, String>,
    method_names: HashMap<Address, MethodSymbol>,
    klasses: Interner<Klass>,
    methods: Interner<Method>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, SymbolError> {
        let file: SymbolFile = serde_json::from_str(json)?;
        let parse = |key: &String| {
            key.parse::<Address>()
                .map_err(|_| SymbolError::Address(key.clone()))
        };
        let mut table = Self::new();
        for (key, name) in file.klasses {
            table.klass_names.insert(parse(&key)?, name);
        }
        for (key, symbol) in file.methods {
            table.method_names.insert(parse(&key)?, symbol);
        }
        Ok(table)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SymbolError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn with_klass(mut self, address: Address, name: &str) -> Self {
        self.klass_names.insert(address, name.to_string());
        self
    }

    pub fn with_method(mut self, address: Address, holder: &str, name: &str, sig: &str) -> Self {
        self.method_names.insert(
            address,
            MethodSymbol {
                holder: holder.to_string(),
                name: name.to_string(),
                signature: sig.to_string(),
            },
        );
        self
    }
}

impl ObjectResolver for SymbolTable {
    fn klass(&self, address: Address) -> Option<Klass> {
        self.klasses.get_or_insert_with(address, |address| {
            let name = self.klass_names.get(&address)?;
            Some(Klass::new(address, name.as_str()))
        })
    }

    fn method(&self, address: Address) -> Option<Method> {
        self.methods.get_or_insert_with(address, |address| {
            let symbol = self.method_names.get(&address)?;
            Some(Method::new(
                address,
                symbol.holder.as_str(),
                symbol.name.as_str(),
                symbol.signature.as_str(),
            ))
        })
    }
}

#[derive(Debug, Copy, Clone)]
struct VmFields {
    klass_name: Field,
    symbol_length: Field,
    symbol_body: Field,
    method_const_method: Field,
    const_method_constants: Field,
    const_method_name_index: Field,
    const_method_signature_index: Field,
    pool_holder: Field,
    pool_header_size: u64,
}

/// Resolver that reads class and method names directly out of target memory.
///
/// Class names come from `Klass::_name`; method names from the method's constant pool, indexed
/// by the name and signature indices stored in its `ConstMethod`.
pub struct VmResolver<M> {
    memory: M,
    fields: VmFields,
    word_size: usize,
    endian: Endian,
    klasses: Interner<Klass>,
    methods: Interner<Method>,
}

impl<M: MemoryReader> VmResolver<M> {
    pub fn new(memory: M, schema: &TypeSchema) -> Result<Self, SchemaError> {
        let fields = VmFields {
            klass_name: schema.field("Klass", "_name")?,
            symbol_length: schema.field("Symbol", "_length")?,
            symbol_body: schema.field("Symbol", "_body")?,
            method_const_method: schema.field("Method", "_constMethod")?,
            const_method_constants: schema.field("ConstMethod", "_constants")?,
            const_method_name_index: schema.field("ConstMethod", "_name_index")?,
            const_method_signature_index: schema.field("ConstMethod", "_signature_index")?,
            pool_holder: schema.field("ConstantPool", "_pool_holder")?,
            pool_header_size: schema.type_size("ConstantPool")? as u64,
        };
        Ok(Self {
            memory,
            fields,
            word_size: schema.cell_size(),
            endian: schema.endian(),
            klasses: Interner::new(),
            methods: Interner::new(),
        })
    }

    fn pointer(&self, base: Address, field: Field) -> Option<Address> {
        let value = self.memory.read_field(base, field, self.endian).ok()?;
        Address::new(value).non_null()
    }

    fn symbol(&self, symbol: Address) -> Option<String> {
        let len = self
            .memory
            .read_field(symbol, self.fields.symbol_length, self.endian)
            .ok()?;
        let bytes = self
            .memory
            .read_bytes(symbol + self.fields.symbol_body.offset, len as usize)
            .ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn klass_name(&self, klass: Address) -> Option<String> {
        self.symbol(self.pointer(klass, self.fields.klass_name)?)
    }

    fn pool_symbol(&self, pool: Address, index: u64) -> Option<String> {
        let slot = pool + self.fields.pool_header_size + index * self.word_size as u64;
        let symbol = self
            .memory
            .read_uint(slot, self.word_size, self.endian)
            .ok()?;
        self.symbol(Address::new(symbol).non_null()?)
    }

    fn read_method(&self, method: Address) -> Option<Method> {
        let fields = &self.fields;
        let const_method = self.pointer(method, fields.method_const_method)?;
        let pool = self.pointer(const_method, fields.const_method_constants)?;
        let holder = self.klass(self.pointer(pool, fields.pool_holder)?)?;
        let name_index = self
            .memory
            .read_field(const_method, fields.const_method_name_index, self.endian)
            .ok()?;
        let signature_index = self
            .memory
            .read_field(const_method, fields.const_method_signature_index, self.endian)
            .ok()?;
        Some(Method::new(
            method,
            holder.name(),
            self.pool_symbol(pool, name_index)?,
            self.pool_symbol(pool, signature_index)?,
        ))
    }
}

impl<M: MemoryReader> ObjectResolver for VmResolver<M> {
    fn klass(&self, address: Address) -> Option<Klass> {
        self.klasses.get_or_insert_with(address, |address| {
            let name = self.klass_name(address);
            if name.is_none() {
                tracing::warn!(%address, "unable to read klass name");
            }
            Some(Klass::new(address, name?))
        })
    }

    fn method(&self, address: Address) -> Option<Method> {
        self.methods.get_or_insert_with(address, |address| {
            let method = self.read_method(address);
            if method.is_none() {
                tracing::warn!(%address, "unable to read method name");
            }
            method
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use crate::memory::SliceMemory;

    #[test]
    fn symbol_table_interns_handles() {
        let table = SymbolTable::new().with_klass(Address::new(0x1000), "java/lang/String");
        let first = table.klass(Address::new(0x1000)).unwrap();
        let second = table.klass(Address::new(0x1000)).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.name(), "java/lang/String");
        assert_eq!(table.klass(Address::new(0x2000)), None);
        assert_eq!(table.klass(Address::NULL), None);
    }

    #[test]
    fn symbol_table_from_json() {
        let table = SymbolTable::from_json(
            r#"{
                "klasses": { "0x1000": "java/lang/Object" },
                "methods": {
                    "0x2000": { "holder": "Foo", "name": "bar", "signature": "(I)V" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(
            table.klass(Address::new(0x1000)).unwrap().name(),
            "java/lang/Object"
        );
        let method = table.method(Address::new(0x2000)).unwrap();
        assert_eq!(method.replay_name(), "Foo bar (I)V");
        assert_eq!(method.to_string(), "Foo.bar(I)V");
        assert!(matches!(
            SymbolTable::from_json(r#"{"klasses": {"nope": "X"}}"#),
            Err(SymbolError::Address(_))
        ));
    }

    #[test]
    fn vm_resolver_reads_names_from_memory() {
        let schema = test_utils::schema(8, Endian::Little);
        let mut image = test_utils::VmImage::new(Address::new(0x10_0000));
        let klass = image.klass("java/util/ArrayList");
        let method = image.method(klass, "add", "(Ljava/lang/Object;)Z");
        let memory = SliceMemory::new().with_segment(image.base(), image.into_bytes());

        let resolver = VmResolver::new(&memory, &schema).unwrap();
        let resolved = resolver.method(method).unwrap();
        assert_eq!(
            resolved.replay_name(),
            "java/util/ArrayList add (Ljava/lang/Object;)Z"
        );
        assert!(resolver
            .klass(klass)
            .unwrap()
            .ptr_eq(&resolver.klass(klass).unwrap()));
        assert_eq!(resolver.klass(Address::new(0x42)), None);
        assert_eq!(resolver.method(Address::NULL), None);
    }
}
