//! Lookup-or-create of stores, brands, suppliers and products
//!
//! Runs inside the file transaction before any snapshot row is flushed so
//! every foreign key exists by the time the bulk upsert runs. Names match
//! case-insensitively (`LOWER(name)` is unique in each table).

use sqlx::{PgConnection, QueryBuilder};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::Result;

/// Product rows per upsert statement
const PRODUCT_CHUNK: usize = 1000;

const PLACEHOLDER_PREFIX: &str = "Product ";

/// Name stored for a product whose source row carries none
pub fn placeholder_product_name(sku: &str) -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, sku.trim())
}

/// Tables keyed by a case-insensitive `name`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedEntity {
    Store,
    Brand,
    Supplier,
}

impl NamedEntity {
    pub fn table(self) -> &'static str {
        match self {
            NamedEntity::Store => "stores",
            NamedEntity::Brand => "brands",
            NamedEntity::Supplier => "suppliers",
        }
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// What a product row is created from
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSeed {
    pub sku: String,
    pub name: String,
    pub brand: String,
    pub supplier: String,
    /// Cost price; only fills a stored value that is NULL or zero
    pub hpp: f64,
}

/// Entities a file refers to, collected before resolution
#[derive(Debug, Default)]
pub struct EntityRequest {
    stores: Vec<String>,
    brands: Vec<String>,
    suppliers: Vec<String>,
    products: HashMap<String, ProductSeed>,
}

impl EntityRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, name: &str) {
        push_name(&mut self.stores, name);
    }

    pub fn brand(&mut self, name: &str) {
        push_name(&mut self.brands, name);
    }

    pub fn supplier(&mut self, name: &str) {
        push_name(&mut self.suppliers, name);
    }

    /// Register a product; a later seed for the same SKU wins.
    pub fn product(&mut self, seed: ProductSeed) {
        if seed.sku.trim().is_empty() {
            return;
        }
        self.brand(&seed.brand);
        self.supplier(&seed.supplier);
        self.products.insert(seed.sku.trim().to_string(), seed);
    }
}

fn push_name(names: &mut Vec<String>, name: &str) {
    let trimmed = name.trim();
    if !trimmed.is_empty() {
        names.push(trimmed.to_string());
    }
}

/// Resolved database ids
#[derive(Debug, Default, Clone)]
pub struct EntityIds {
    stores: HashMap<String, i64>,
    brands: HashMap<String, i64>,
    suppliers: HashMap<String, i64>,
    products: HashMap<String, i64>,
}

impl EntityIds {
    pub fn store(&self, name: &str) -> Option<i64> {
        self.stores.get(&name_key(name)).copied()
    }

    pub fn brand(&self, name: &str) -> Option<i64> {
        self.brands.get(&name_key(name)).copied()
    }

    pub fn supplier(&self, name: &str) -> Option<i64> {
        self.suppliers.get(&name_key(name)).copied()
    }

    pub fn product(&self, sku: &str) -> Option<i64> {
        self.products.get(sku.trim()).copied()
    }
}

/// Resolve every entity in `request`, creating the missing ones.
pub async fn resolve(conn: &mut PgConnection, request: EntityRequest) -> Result<EntityIds> {
    let stores = resolve_names(conn, NamedEntity::Store, &request.stores).await?;
    let brands = resolve_names(conn, NamedEntity::Brand, &request.brands).await?;
    let suppliers = resolve_names(conn, NamedEntity::Supplier, &request.suppliers).await?;

    let mut ids = EntityIds {
        stores,
        brands,
        suppliers,
        products: HashMap::new(),
    };

    let mut seeds: Vec<ProductSeed> = request.products.into_values().collect();
    seeds.sort_by(|a, b| a.sku.cmp(&b.sku));
    for chunk in seeds.chunks(PRODUCT_CHUNK) {
        let resolved = upsert_products(conn, chunk, &ids).await?;
        ids.products.extend(resolved);
    }

    debug!(
        stores = ids.stores.len(),
        brands = ids.brands.len(),
        suppliers = ids.suppliers.len(),
        products = ids.products.len(),
        "Resolved entities"
    );
    Ok(ids)
}

/// Distinct non-empty names as (lowercased key, first spelling seen),
/// ordered by key. Concurrent files insert new names in this same order.
fn unique_names(names: &[String]) -> Vec<(String, &str)> {
    let mut unique: BTreeMap<String, &str> = BTreeMap::new();
    for name in names {
        let key = name_key(name);
        if !key.is_empty() {
            unique.entry(key).or_insert_with(|| name.trim());
        }
    }
    unique.into_iter().collect()
}

/// Look names up case-insensitively and insert the ones not found.
///
/// Returns lowercased name -> id.
pub async fn resolve_names(
    conn: &mut PgConnection,
    entity: NamedEntity,
    names: &[String],
) -> Result<HashMap<String, i64>> {
    let wanted = unique_names(names);
    if wanted.is_empty() {
        return Ok(HashMap::new());
    }

    let keys: Vec<String> = wanted.iter().map(|(key, _)| key.clone()).collect();
    let sql = format!(
        "SELECT id, LOWER(name) FROM {} WHERE LOWER(name) = ANY($1)",
        entity.table()
    );
    let found: Vec<(i64, String)> = sqlx::query_as(&sql)
        .bind(&keys[..])
        .fetch_all(&mut *conn)
        .await?;
    let mut ids: HashMap<String, i64> = found.into_iter().map(|(id, key)| (key, id)).collect();

    let missing: Vec<&str> = wanted
        .iter()
        .filter(|(key, _)| !ids.contains_key(key))
        .map(|(_, name)| *name)
        .collect();

    if !missing.is_empty() {
        let mut builder = QueryBuilder::new(format!("INSERT INTO {} (name) ", entity.table()));
        builder.push_values(missing.iter(), |mut b, name| {
            b.push_bind(*name);
        });
        builder.push(" ON CONFLICT ((LOWER(name))) DO UPDATE SET updated_at = NOW() RETURNING id, LOWER(name)");

        let created: Vec<(i64, String)> = builder.build_query_as().fetch_all(&mut *conn).await?;
        debug!(table = entity.table(), created = created.len(), "Created entities");
        ids.extend(created.into_iter().map(|(id, key)| (key, id)));
    }

    Ok(ids)
}

/// Upsert tail for `products`. A blank or placeholder name never replaces a
/// stored one; HPP only fills a stored NULL or zero.
fn product_conflict_clause() -> String {
    format!(
        r#"
        ON CONFLICT (sku) DO UPDATE SET
            name = CASE
                WHEN EXCLUDED.name = '' OR EXCLUDED.name = '{prefix}' || EXCLUDED.sku THEN products.name
                ELSE EXCLUDED.name
            END,
            brand_id = COALESCE(EXCLUDED.brand_id, products.brand_id),
            supplier_id = COALESCE(EXCLUDED.supplier_id, products.supplier_id),
            hpp = CASE
                WHEN products.hpp IS NULL OR products.hpp = 0 THEN EXCLUDED.hpp
                ELSE products.hpp
            END,
            updated_at = NOW()
        RETURNING sku, id
        "#,
        prefix = PLACEHOLDER_PREFIX
    )
}

async fn upsert_products(
    conn: &mut PgConnection,
    seeds: &[ProductSeed],
    ids: &EntityIds,
) -> Result<Vec<(String, i64)>> {
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::new("INSERT INTO products (sku, name, brand_id, supplier_id, hpp) ");
    builder.push_values(seeds.iter(), |mut b, seed| {
        b.push_bind(seed.sku.trim())
            .push_bind(seed.name.trim())
            .push_bind(ids.brand(&seed.brand))
            .push_bind(ids.supplier(&seed.supplier))
            .push_bind(seed.hpp);
    });
    builder.push(product_conflict_clause());

    let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&mut *conn).await?;
    Ok(rows)
}
