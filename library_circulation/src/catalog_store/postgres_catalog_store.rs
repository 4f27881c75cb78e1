use std::collections::HashSet;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};

use crate::api::{
    BorrowerId, CatalogItem, Category, CategoryDetails, CategoryId, CategoryLink, ItemId, Loan,
    LoanId, NewCatalogItem, NewLoan, NewReservation, Reservation, ReservationId,
};
use crate::catalog_store::{CatalogStore, CatalogStoreError};

const ITEM_COLUMNS: &str = "id, title, publication_year, publisher, available, cover_url, details";
const LOAN_COLUMNS: &str = "id, item_id, borrower_id, loaned_at, due_at, returned_at";
const RESERVATION_COLUMNS: &str = "id, item_id, borrower_id, reserved_at, active";

pub struct PostgresCatalogStoreConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

/// Catalog store backed by PostgreSQL.
///
/// Transactions need exclusive access to the connection, hence the mutex.
/// Atomic operations additionally lock the item row with `FOR UPDATE` so that
/// several server processes sharing one database stay serialized per item.
pub struct PostgresCatalogStore {
    client: Mutex<Client>,
}

impl PostgresCatalogStore {
    pub async fn init(config: PostgresCatalogStoreConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}",
            config.username, config.password, config.hostname
        );
        tracing::info!(hostname = %config.hostname, "Connecting to postgres");
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Postgres connection error: {}", e);
            }
        });

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS catalog_items (
            id                  SERIAL PRIMARY KEY,
            title               TEXT NOT NULL,
            publication_year    INTEGER NOT NULL,
            publisher           TEXT NOT NULL,
            available           BOOLEAN NOT NULL DEFAULT TRUE,
            cover_url           TEXT,
            details             JSONB NOT NULL
            );
        CREATE TABLE IF NOT EXISTS categories (
            id                  SERIAL PRIMARY KEY,
            name                TEXT NOT NULL,
            description         TEXT NOT NULL
            );
        CREATE TABLE IF NOT EXISTS category_links (
            item_id             INTEGER NOT NULL REFERENCES catalog_items (id) ON DELETE CASCADE,
            category_id         INTEGER NOT NULL REFERENCES categories (id) ON DELETE CASCADE,
            PRIMARY KEY (item_id, category_id)
            );
        CREATE TABLE IF NOT EXISTS loans (
            id                  SERIAL PRIMARY KEY,
            item_id             INTEGER NOT NULL REFERENCES catalog_items (id) ON DELETE RESTRICT,
            borrower_id         INTEGER NOT NULL,
            loaned_at           TIMESTAMPTZ NOT NULL,
            due_at              TIMESTAMPTZ NOT NULL,
            returned_at         TIMESTAMPTZ
            );
        CREATE UNIQUE INDEX IF NOT EXISTS loans_one_open_per_item
            ON loans (item_id) WHERE returned_at IS NULL;
        CREATE TABLE IF NOT EXISTS reservations (
            id                  SERIAL PRIMARY KEY,
            item_id             INTEGER NOT NULL REFERENCES catalog_items (id) ON DELETE CASCADE,
            borrower_id         INTEGER NOT NULL,
            reserved_at         TIMESTAMPTZ NOT NULL,
            active              BOOLEAN NOT NULL DEFAULT TRUE
            );
        CREATE UNIQUE INDEX IF NOT EXISTS reservations_one_active_per_borrower
            ON reservations (item_id, borrower_id) WHERE active;
        ",
            )
            .await
            .context("Failed to setup tables")?;

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code()
        .map(|code| code == &SqlState::UNIQUE_VIOLATION)
        .unwrap_or_default()
}

fn item_from_row(row: &Row) -> Result<CatalogItem, CatalogStoreError> {
    let details: serde_json::Value = row.try_get(6)?;
    Ok(CatalogItem {
        id: row.try_get(0)?,
        title: row.try_get(1)?,
        publication_year: row.try_get(2)?,
        publisher: row.try_get(3)?,
        available: row.try_get(4)?,
        cover_url: row.try_get(5)?,
        details: serde_json::from_value(details)?,
    })
}

fn category_from_row(row: &Row) -> Result<Category, CatalogStoreError> {
    Ok(Category {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        description: row.try_get(2)?,
    })
}

fn loan_from_row(row: &Row) -> Result<Loan, CatalogStoreError> {
    Ok(Loan {
        id: row.try_get(0)?,
        item_id: row.try_get(1)?,
        borrower_id: row.try_get(2)?,
        loaned_at: row.try_get(3)?,
        due_at: row.try_get(4)?,
        returned_at: row.try_get(5)?,
    })
}

fn reservation_from_row(row: &Row) -> Result<Reservation, CatalogStoreError> {
    Ok(Reservation {
        id: row.try_get(0)?,
        item_id: row.try_get(1)?,
        borrower_id: row.try_get(2)?,
        reserved_at: row.try_get(3)?,
        active: row.try_get(4)?,
    })
}

#[async_trait::async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn add_item(&self, item: NewCatalogItem) -> Result<CatalogItem, CatalogStoreError> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO catalog_items (title, publication_year, publisher, available, cover_url, details)
                     VALUES ($1, $2, $3, TRUE, $4, $5) RETURNING {ITEM_COLUMNS}"
                ),
                &[
                    &item.title,
                    &item.publication_year,
                    &item.publisher,
                    &item.cover_url,
                    &json!(item.details),
                ],
            )
            .await?;
        item_from_row(&row)
    }

    async fn get_item(&self, item_id: ItemId) -> Result<CatalogItem, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM catalog_items WHERE id = $1"),
                &[&item_id],
            )
            .await?;
        item_from_row(
            rows.first()
                .ok_or(CatalogStoreError::ItemNotFound(item_id))?,
        )
    }

    async fn list_items(&self) -> Result<Vec<CatalogItem>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM catalog_items ORDER BY id"),
                &[],
            )
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn update_item(&self, item: &CatalogItem) -> Result<CatalogItem, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "UPDATE catalog_items
                     SET title = $2, publication_year = $3, publisher = $4, cover_url = $5, details = $6
                     WHERE id = $1 RETURNING {ITEM_COLUMNS}"
                ),
                &[
                    &item.id,
                    &item.title,
                    &item.publication_year,
                    &item.publisher,
                    &item.cover_url,
                    &json!(item.details),
                ],
            )
            .await?;
        item_from_row(
            rows.first()
                .ok_or(CatalogStoreError::ItemNotFound(item.id))?,
        )
    }

    async fn delete_item(&self, item_id: ItemId) -> Result<(), CatalogStoreError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;
        let exists = transaction
            .query_opt(
                "SELECT id FROM catalog_items WHERE id = $1 FOR UPDATE",
                &[&item_id],
            )
            .await?;
        if exists.is_none() {
            return Err(CatalogStoreError::ItemNotFound(item_id));
        }
        let has_loans: bool = transaction
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM loans WHERE item_id = $1)",
                &[&item_id],
            )
            .await?
            .try_get(0)?;
        if has_loans {
            return Err(CatalogStoreError::ItemHasLoanHistory(item_id));
        }
        transaction
            .execute("DELETE FROM catalog_items WHERE id = $1", &[&item_id])
            .await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn add_category(
        &self,
        details: CategoryDetails,
    ) -> Result<Category, CatalogStoreError> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "INSERT INTO categories (name, description) VALUES ($1, $2) RETURNING id, name, description",
                &[&details.name, &details.description],
            )
            .await?;
        category_from_row(&row)
    }

    async fn get_category(&self, category_id: CategoryId) -> Result<Category, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT id, name, description FROM categories WHERE id = $1",
                &[&category_id],
            )
            .await?;
        category_from_row(
            rows.first()
                .ok_or(CatalogStoreError::CategoryNotFound(category_id))?,
        )
    }

    async fn list_categories(&self) -> Result<Vec<Category>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query("SELECT id, name, description FROM categories ORDER BY id", &[])
            .await?;
        rows.iter().map(category_from_row).collect()
    }

    async fn update_category(
        &self,
        category_id: CategoryId,
        details: CategoryDetails,
    ) -> Result<Category, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "UPDATE categories SET name = $2, description = $3 WHERE id = $1 RETURNING id, name, description",
                &[&category_id, &details.name, &details.description],
            )
            .await?;
        category_from_row(
            rows.first()
                .ok_or(CatalogStoreError::CategoryNotFound(category_id))?,
        )
    }

    async fn delete_category(&self, category_id: CategoryId) -> Result<(), CatalogStoreError> {
        let client = self.client.lock().await;
        let deleted = client
            .execute("DELETE FROM categories WHERE id = $1", &[&category_id])
            .await?;
        if deleted == 0 {
            Err(CatalogStoreError::CategoryNotFound(category_id))
        } else {
            Ok(())
        }
    }

    async fn link_item(&self, link: CategoryLink) -> Result<(), CatalogStoreError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;
        if transaction
            .query_opt("SELECT id FROM categories WHERE id = $1", &[&link.category_id])
            .await?
            .is_none()
        {
            return Err(CatalogStoreError::CategoryNotFound(link.category_id));
        }
        if transaction
            .query_opt("SELECT id FROM catalog_items WHERE id = $1", &[&link.item_id])
            .await?
            .is_none()
        {
            return Err(CatalogStoreError::ItemNotFound(link.item_id));
        }
        match transaction
            .execute(
                "INSERT INTO category_links (item_id, category_id) VALUES ($1, $2)",
                &[&link.item_id, &link.category_id],
            )
            .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(CatalogStoreError::DuplicateCategoryLink {
                    item_id: link.item_id,
                    category_id: link.category_id,
                })
            }
            Err(other_err) => return Err(other_err.into()),
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn unlink_item(&self, link: CategoryLink) -> Result<(), CatalogStoreError> {
        let client = self.client.lock().await;
        let deleted = client
            .execute(
                "DELETE FROM category_links WHERE item_id = $1 AND category_id = $2",
                &[&link.item_id, &link.category_id],
            )
            .await?;
        if deleted == 0 {
            Err(CatalogStoreError::CategoryLinkNotFound {
                item_id: link.item_id,
                category_id: link.category_id,
            })
        } else {
            Ok(())
        }
    }

    async fn list_category_links(&self) -> Result<Vec<CategoryLink>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT item_id, category_id FROM category_links ORDER BY item_id, category_id",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(CategoryLink {
                    item_id: row.try_get(0)?,
                    category_id: row.try_get(1)?,
                })
            })
            .collect()
    }

    async fn item_ids_in_category(
        &self,
        category_id: CategoryId,
    ) -> Result<HashSet<ItemId>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT item_id FROM category_links WHERE category_id = $1",
                &[&category_id],
            )
            .await?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }

    async fn open_loan(&self, loan: NewLoan) -> Result<Loan, CatalogStoreError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;
        let available: bool = transaction
            .query_opt(
                "SELECT available FROM catalog_items WHERE id = $1 FOR UPDATE",
                &[&loan.item_id],
            )
            .await?
            .ok_or(CatalogStoreError::ItemNotFound(loan.item_id))?
            .try_get(0)?;
        if !available {
            return Err(CatalogStoreError::ItemUnavailable(loan.item_id));
        }

        let row = match transaction
            .query_one(
                &format!(
                    "INSERT INTO loans (item_id, borrower_id, loaned_at, due_at)
                     VALUES ($1, $2, $3, $4) RETURNING {LOAN_COLUMNS}"
                ),
                &[&loan.item_id, &loan.borrower_id, &loan.loaned_at, &loan.due_at],
            )
            .await
        {
            Ok(row) => row,
            // Open loan left behind by a writer that bypassed the availability flag
            Err(err) if is_unique_violation(&err) => {
                return Err(CatalogStoreError::ItemUnavailable(loan.item_id))
            }
            Err(other_err) => return Err(other_err.into()),
        };
        transaction
            .execute(
                "UPDATE catalog_items SET available = FALSE WHERE id = $1",
                &[&loan.item_id],
            )
            .await?;
        transaction.commit().await?;
        loan_from_row(&row)
    }

    async fn close_loan(
        &self,
        loan_id: LoanId,
        returned_at: DateTime<Utc>,
    ) -> Result<Loan, CatalogStoreError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;
        let row = transaction
            .query_opt(
                &format!(
                    "UPDATE loans SET returned_at = $2
                     WHERE id = $1 AND returned_at IS NULL RETURNING {LOAN_COLUMNS}"
                ),
                &[&loan_id, &returned_at],
            )
            .await?
            .ok_or(CatalogStoreError::LoanNotFound(loan_id))?;
        let loan = loan_from_row(&row)?;
        transaction
            .execute(
                "UPDATE catalog_items SET available = TRUE WHERE id = $1",
                &[&loan.item_id],
            )
            .await?;
        transaction.commit().await?;
        Ok(loan)
    }

    async fn list_loans(&self) -> Result<Vec<Loan>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(&format!("SELECT {LOAN_COLUMNS} FROM loans ORDER BY id"), &[])
            .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn list_borrower_loans(
        &self,
        borrower_id: BorrowerId,
    ) -> Result<Vec<Loan>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!("SELECT {LOAN_COLUMNS} FROM loans WHERE borrower_id = $1 ORDER BY id"),
                &[&borrower_id],
            )
            .await?;
        rows.iter().map(loan_from_row).collect()
    }

    async fn add_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, CatalogStoreError> {
        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;
        let available: bool = transaction
            .query_opt(
                "SELECT available FROM catalog_items WHERE id = $1 FOR UPDATE",
                &[&reservation.item_id],
            )
            .await?
            .ok_or(CatalogStoreError::ItemNotFound(reservation.item_id))?
            .try_get(0)?;
        if available {
            return Err(CatalogStoreError::ItemAlreadyAvailable(reservation.item_id));
        }

        let row = match transaction
            .query_one(
                &format!(
                    "INSERT INTO reservations (item_id, borrower_id, reserved_at, active)
                     VALUES ($1, $2, $3, TRUE) RETURNING {RESERVATION_COLUMNS}"
                ),
                &[
                    &reservation.item_id,
                    &reservation.borrower_id,
                    &reservation.reserved_at,
                ],
            )
            .await
        {
            Ok(row) => row,
            // This is the partial unique index on active reservations
            Err(err) if is_unique_violation(&err) => {
                return Err(CatalogStoreError::DuplicateReservation {
                    item_id: reservation.item_id,
                    borrower_id: reservation.borrower_id,
                })
            }
            Err(other_err) => return Err(other_err.into()),
        };
        transaction.commit().await?;
        reservation_from_row(&row)
    }

    async fn deactivate_reservation(
        &self,
        reservation_id: ReservationId,
        borrower_id: BorrowerId,
    ) -> Result<Reservation, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "UPDATE reservations SET active = FALSE
                     WHERE id = $1 AND borrower_id = $2 AND active RETURNING {RESERVATION_COLUMNS}"
                ),
                &[&reservation_id, &borrower_id],
            )
            .await?;
        reservation_from_row(
            rows.first()
                .ok_or(CatalogStoreError::ReservationNotFound(reservation_id))?,
        )
    }

    async fn list_active_reservations_for_borrower(
        &self,
        borrower_id: BorrowerId,
    ) -> Result<Vec<Reservation>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations
                     WHERE borrower_id = $1 AND active ORDER BY reserved_at, id"
                ),
                &[&borrower_id],
            )
            .await?;
        rows.iter().map(reservation_from_row).collect()
    }

    async fn list_active_reservations_for_item(
        &self,
        item_id: ItemId,
    ) -> Result<Vec<Reservation>, CatalogStoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations
                     WHERE item_id = $1 AND active ORDER BY reserved_at, id"
                ),
                &[&item_id],
            )
            .await?;
        rows.iter().map(reservation_from_row).collect()
    }
}

#[cfg(all(test, feature = "postgres_tests"))]
mod tests_postgres_catalog_store {
    use chrono::Duration;
    use serial_test::file_serial;
    use testcontainers::core::IntoContainerPort;
    use testcontainers::runners::AsyncRunner;
    use testcontainers::{ContainerAsync, GenericImage, ImageExt};

    use super::*;
    use crate::api::ItemDetails;

    async fn start_postgres_container_and_init_store(
    ) -> (ContainerAsync<GenericImage>, PostgresCatalogStore) {
        let pg_container = GenericImage::new("postgres", "latest")
            .with_mapped_port(5432, 5432.tcp())
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await
            .expect("Failed to start postgres");

        for _ in 0..10 {
            if let Ok(store) = PostgresCatalogStore::init(PostgresCatalogStoreConfig {
                hostname: "127.0.0.1".to_string(),
                username: "postgres".to_string(),
                password: "postgres".to_string(),
            })
            .await
            {
                return (pg_container, store);
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        panic!("Failed to setup postgres container")
    }

    fn book(title: &str) -> NewCatalogItem {
        NewCatalogItem {
            title: title.to_string(),
            publication_year: 1965,
            publisher: "Chilton".to_string(),
            cover_url: None,
            details: ItemDetails::Book {
                author: Some("Frank Herbert".to_string()),
                isbn: "978-0441013593".to_string(),
                page_count: 412,
            },
        }
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Loan lifecycle against a real database
    /// 1. Adds a book and reads it back
    /// 2. Opens a loan, second loan is rejected
    /// 3. Closes the loan, item is available again and cannot be deleted
    async fn test_loan_lifecycle() {
        let (_container, store) = start_postgres_container_and_init_store().await;

        let item = store.add_item(book("Dune")).await.unwrap();
        assert_eq!(store.get_item(item.id).await.unwrap(), item);

        let loaned_at = Utc::now();
        let new_loan = NewLoan {
            item_id: item.id,
            borrower_id: 1,
            loaned_at,
            due_at: loaned_at + Duration::days(15),
        };
        let loan = store.open_loan(new_loan.clone()).await.unwrap();
        assert!(!store.get_item(item.id).await.unwrap().available);
        assert!(matches!(
            store.open_loan(new_loan).await,
            Err(CatalogStoreError::ItemUnavailable(..))
        ));

        store.close_loan(loan.id, Utc::now()).await.unwrap();
        assert!(store.get_item(item.id).await.unwrap().available);
        assert!(matches!(
            store.close_loan(loan.id, Utc::now()).await,
            Err(CatalogStoreError::LoanNotFound(..))
        ));
        assert!(matches!(
            store.delete_item(item.id).await,
            Err(CatalogStoreError::ItemHasLoanHistory(..))
        ));
    }

    #[tokio::test]
    #[file_serial(key, path => "../.pgtestslock")]
    /// Reservation queue against a real database
    async fn test_reservation_queue() {
        let (_container, store) = start_postgres_container_and_init_store().await;

        let item = store.add_item(book("Dune Messiah")).await.unwrap();
        let loaned_at = Utc::now();
        store
            .open_loan(NewLoan {
                item_id: item.id,
                borrower_id: 9,
                loaned_at,
                due_at: loaned_at + Duration::days(15),
            })
            .await
            .unwrap();

        for borrower_id in [1, 2] {
            store
                .add_reservation(NewReservation {
                    item_id: item.id,
                    borrower_id,
                    reserved_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let duplicate = store
            .add_reservation(NewReservation {
                item_id: item.id,
                borrower_id: 1,
                reserved_at: Utc::now(),
            })
            .await;
        assert!(matches!(
            duplicate,
            Err(CatalogStoreError::DuplicateReservation { .. })
        ));

        let queue: Vec<BorrowerId> = store
            .list_active_reservations_for_item(item.id)
            .await
            .unwrap()
            .iter()
            .map(|reservation| reservation.borrower_id)
            .collect();
        assert_eq!(queue, vec![1, 2]);
    }
}
