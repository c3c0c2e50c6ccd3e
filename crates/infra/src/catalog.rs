//! Catalog management: products, categories, suppliers.
//!
//! `ProductCatalog` owns product creation and catalog edits. It never changes a
//! balance; that is the movement ledger's job. `CatalogRegistry` keeps
//! categories and suppliers and enforces their cross-record uniqueness.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use stockledger_catalog::{Category, NewCategory, NewSupplier, Supplier};
use stockledger_core::{
    CategoryId, DomainError, DomainResult, ExpectedVersion, ProductCode, SupplierId,
};
use stockledger_inventory::{NewProduct, Product, ProductDetails};

use crate::config::RetryPolicy;
use crate::error::{ServiceError, ServiceResult};
use crate::store::{LedgerStore, StoreError};

fn poisoned() -> ServiceError {
    ServiceError::Store(StoreError::Backend("lock poisoned".to_string()))
}

/// In-memory categories and suppliers.
#[derive(Debug, Default)]
pub struct CatalogRegistry {
    categories: RwLock<HashMap<CategoryId, Category>>,
    suppliers: RwLock<HashMap<SupplierId, Supplier>>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_category(&self, input: NewCategory) -> ServiceResult<Category> {
        let category = Category::create(CategoryId::new(), input, Utc::now())?;
        let mut categories = self.categories.write().map_err(|_| poisoned())?;
        if categories.values().any(|c| c.name_key() == category.name_key()) {
            return Err(DomainError::conflict(format!("category '{}' already exists", category.name())).into());
        }
        categories.insert(category.id_typed(), category.clone());
        Ok(category)
    }

    pub fn rename_category(&self, id: CategoryId, name: &str) -> ServiceResult<Category> {
        let mut categories = self.categories.write().map_err(|_| poisoned())?;
        let key = name.trim().to_lowercase();
        if categories
            .values()
            .any(|c| c.id_typed() != id && c.name_key() == key)
        {
            return Err(DomainError::conflict(format!("category '{}' already exists", name.trim())).into());
        }
        let category = categories.get_mut(&id).ok_or(DomainError::NotFound)?;
        category.rename(name)?;
        Ok(category.clone())
    }

    pub fn category(&self, id: CategoryId) -> ServiceResult<Option<Category>> {
        let categories = self.categories.read().map_err(|_| poisoned())?;
        Ok(categories.get(&id).cloned())
    }

    /// All categories ordered by name.
    pub fn categories(&self) -> ServiceResult<Vec<Category>> {
        let categories = self.categories.read().map_err(|_| poisoned())?;
        let mut list: Vec<_> = categories.values().cloned().collect();
        list.sort_by_key(|c| c.name_key());
        Ok(list)
    }

    pub fn register_supplier(&self, input: NewSupplier) -> ServiceResult<Supplier> {
        let supplier = Supplier::register(SupplierId::new(), input, Utc::now())?;
        let mut suppliers = self.suppliers.write().map_err(|_| poisoned())?;

        for existing in suppliers.values() {
            if supplier.tax_id().is_some() && existing.tax_id() == supplier.tax_id() {
                return Err(DomainError::conflict("a supplier with this tax id already exists").into());
            }
            if supplier.email().is_some() && existing.email() == supplier.email() {
                return Err(DomainError::conflict("a supplier with this email already exists").into());
            }
        }

        suppliers.insert(supplier.id_typed(), supplier.clone());
        Ok(supplier)
    }

    pub fn deactivate_supplier(&self, id: SupplierId) -> ServiceResult<Supplier> {
        let mut suppliers = self.suppliers.write().map_err(|_| poisoned())?;
        let supplier = suppliers.get_mut(&id).ok_or(DomainError::NotFound)?;
        supplier.deactivate()?;
        Ok(supplier.clone())
    }

    pub fn supplier(&self, id: SupplierId) -> ServiceResult<Option<Supplier>> {
        let suppliers = self.suppliers.read().map_err(|_| poisoned())?;
        Ok(suppliers.get(&id).cloned())
    }

    /// Active suppliers ordered by name.
    pub fn active_suppliers(&self) -> ServiceResult<Vec<Supplier>> {
        let suppliers = self.suppliers.read().map_err(|_| poisoned())?;
        let mut list: Vec<_> = suppliers.values().filter(|s| s.is_active()).cloned().collect();
        list.sort_by_key(|s| s.name().to_lowercase());
        Ok(list)
    }

    fn check_references(&self, category_id: CategoryId, supplier_id: Option<SupplierId>) -> ServiceResult<()> {
        if self.category(category_id)?.is_none() {
            return Err(DomainError::validation(format!("unknown category {category_id}")).into());
        }
        if let Some(id) = supplier_id {
            match self.supplier(id)? {
                Some(s) if s.is_active() => {}
                Some(_) => return Err(DomainError::validation(format!("supplier {id} is inactive")).into()),
                None => return Err(DomainError::validation(format!("unknown supplier {id}")).into()),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductOrder {
    #[default]
    NameAsc,
    NameDesc,
    CodeAsc,
    CodeDesc,
    QuantityAsc,
    QuantityDesc,
}

impl ProductOrder {
    fn compare(self, a: &Product, b: &Product) -> Ordering {
        match self {
            ProductOrder::NameAsc => cmp_name(a, b),
            ProductOrder::NameDesc => cmp_name(b, a),
            ProductOrder::CodeAsc => a.code().cmp(b.code()),
            ProductOrder::CodeDesc => b.code().cmp(a.code()),
            ProductOrder::QuantityAsc => a.quantity_current().cmp(&b.quantity_current()),
            ProductOrder::QuantityDesc => b.quantity_current().cmp(&a.quantity_current()),
        }
    }
}

fn cmp_name(a: &Product, b: &Product) -> Ordering {
    a.name()
        .to_lowercase()
        .cmp(&b.name().to_lowercase())
        .then_with(|| a.code().cmp(b.code()))
}

/// Product search over active products.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    /// Case-insensitive match on name, code or QR code.
    pub text: Option<String>,
    pub category: Option<CategoryId>,
    pub supplier: Option<SupplierId>,
    pub low_stock_only: bool,
    pub order: ProductOrder,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        if !product.is_active() {
            return false;
        }
        if self.low_stock_only && !product.is_low_stock() {
            return false;
        }
        if self.category.is_some_and(|c| c != product.category_id()) {
            return false;
        }
        if self.supplier.is_some_and(|s| Some(s) != product.supplier_id()) {
            return false;
        }
        match self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => {
                let needle = text.to_lowercase();
                [product.name(), product.code().as_str(), product.qr_code()]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            }
            None => true,
        }
    }
}

/// Product catalog service.
#[derive(Debug)]
pub struct ProductCatalog<S> {
    store: S,
    registry: Arc<CatalogRegistry>,
    retry: RetryPolicy,
}

impl<S> ProductCatalog<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, registry: Arc<CatalogRegistry>) -> Self {
        Self {
            store,
            registry,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &CatalogRegistry {
        &self.registry
    }

    #[instrument(skip(self, input), fields(code = %input.code), err)]
    pub fn register(&self, input: NewProduct) -> ServiceResult<Product> {
        self.registry
            .check_references(input.category_id, input.supplier_id)?;
        let product = Product::register(input, Utc::now())?;
        self.store.insert_product(&product)?;
        info!(qr_code = product.qr_code(), "product registered");
        Ok(product)
    }

    #[instrument(skip(self, details), fields(code = %code), err)]
    pub fn update_details(&self, code: &ProductCode, details: ProductDetails) -> ServiceResult<Product> {
        self.registry
            .check_references(details.category_id, details.supplier_id)?;
        self.modify(code, |p| p.update_details(details.clone(), Utc::now()))
    }

    /// Soft delete. Movement history stays; further movements are refused.
    #[instrument(skip(self), fields(code = %code), err)]
    pub fn deactivate(&self, code: &ProductCode) -> ServiceResult<Product> {
        let product = self.modify(code, |p| p.deactivate(Utc::now()))?;
        info!("product deactivated");
        Ok(product)
    }

    pub fn get(&self, code: &ProductCode) -> ServiceResult<Product> {
        self.store
            .load_product(code)?
            .ok_or_else(|| DomainError::NotFound.into())
    }

    /// Active product carrying this QR code.
    pub fn find_by_qr(&self, qr_code: &str) -> ServiceResult<Option<Product>> {
        Ok(self.store.find_by_qr(qr_code.trim())?.filter(Product::is_active))
    }

    pub fn search(&self, filter: &ProductFilter) -> ServiceResult<Vec<Product>> {
        let mut products: Vec<_> = self
            .store
            .list_products()?
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        products.sort_by(|a, b| filter.order.compare(a, b));
        Ok(products)
    }

    /// Load, edit, save under the product's version; re-run on a lost race.
    fn modify(
        &self,
        code: &ProductCode,
        mut edit: impl FnMut(&mut Product) -> DomainResult<()>,
    ) -> ServiceResult<Product> {
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let mut product = self.get(code)?;
            let expected = ExpectedVersion::of(&product);
            edit(&mut product)?;
            match self.store.save_product(&product, expected) {
                Ok(()) => return Ok(product),
                Err(StoreError::Concurrency(msg)) => {
                    debug!(attempt, conflict = %msg, "catalog edit lost a version race");
                    std::thread::sleep(self.retry.delay_after(attempt));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DomainError::conflict(format!("product {code} kept changing; edit not applied")).into())
    }
}
