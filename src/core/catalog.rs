//! SAT catalog lookup.
//!
//! The validator never owns catalog contents. It asks a [`CatalogProvider`]
//! whether a code belongs to a named catalog; where the data comes from
//! (database, bundled CSV, remote service) is the caller's business.

use std::collections::{HashMap, HashSet};

/// SAT catalogs consulted by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Catalog {
    RegimenFiscal,
    UsoCfdi,
    ClaveProdServ,
    ClaveUnidad,
    Moneda,
    FormaPago,
    MetodoPago,
    TipoRelacion,
    Pais,
    Impuesto,
    CodigoPostal,
}

impl Catalog {
    /// SAT identifier of the catalog, e.g. "c_UsoCFDI".
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegimenFiscal => "c_RegimenFiscal",
            Self::UsoCfdi => "c_UsoCFDI",
            Self::ClaveProdServ => "c_ClaveProdServ",
            Self::ClaveUnidad => "c_ClaveUnidad",
            Self::Moneda => "c_Moneda",
            Self::FormaPago => "c_FormaPago",
            Self::MetodoPago => "c_MetodoPago",
            Self::TipoRelacion => "c_TipoRelacion",
            Self::Pais => "c_Pais",
            Self::Impuesto => "c_Impuesto",
            Self::CodigoPostal => "c_CodigoPostal",
        }
    }

    /// Parse from the SAT identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    pub const ALL: [Catalog; 11] = [
        Self::RegimenFiscal,
        Self::UsoCfdi,
        Self::ClaveProdServ,
        Self::ClaveUnidad,
        Self::Moneda,
        Self::FormaPago,
        Self::MetodoPago,
        Self::TipoRelacion,
        Self::Pais,
        Self::Impuesto,
        Self::CodigoPostal,
    ];
}

/// Membership lookup over SAT catalogs.
///
/// Implementations must be cheap to call repeatedly; the validator asks
/// once per coded field.
pub trait CatalogProvider {
    fn is_member(&self, catalog: Catalog, code: &str) -> bool;
}

impl<T: CatalogProvider + ?Sized> CatalogProvider for &T {
    fn is_member(&self, catalog: Catalog, code: &str) -> bool {
        (**self).is_member(catalog, code)
    }
}

/// In-memory catalog provider.
///
/// Catalogs that were never loaded reject every code, so a missing table
/// shows up as violations instead of silently passing.
///
/// ```
/// use cfdi::core::{Catalog, CatalogProvider, StaticCatalog};
///
/// let catalogs = StaticCatalog::new()
///     .with(Catalog::Moneda, ["MXN", "USD", "XXX"])
///     .with(Catalog::UsoCfdi, ["G01", "G03", "P01"]);
///
/// assert!(catalogs.is_member(Catalog::Moneda, "USD"));
/// assert!(!catalogs.is_member(Catalog::Moneda, "EUR"));
/// assert!(!catalogs.is_member(Catalog::ClaveUnidad, "H87"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<Catalog, HashSet<String>>,
    open: HashSet<Catalog>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add codes to a catalog.
    pub fn with<I, S>(mut self, catalog: Catalog, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(catalog, codes);
        self
    }

    /// Accept every code for this catalog (e.g. when the 50k-row
    /// c_ClaveProdServ table is checked elsewhere).
    pub fn accept_all(mut self, catalog: Catalog) -> Self {
        self.open.insert(catalog);
        self
    }

    pub fn insert<I, S>(&mut self, catalog: Catalog, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .entry(catalog)
            .or_default()
            .extend(codes.into_iter().map(Into::into));
    }

    /// Number of codes loaded for a catalog.
    pub fn len(&self, catalog: Catalog) -> usize {
        self.entries.get(&catalog).map_or(0, HashSet::len)
    }
}

impl CatalogProvider for StaticCatalog {
    fn is_member(&self, catalog: Catalog, code: &str) -> bool {
        self.open.contains(&catalog)
            || self
                .entries
                .get(&catalog)
                .is_some_and(|codes| codes.contains(code))
    }
}
