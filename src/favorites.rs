use crate::error::LedgerError;
use crate::store::Store;
use crate::types::{Favorite, User};

fn customer_id(caller: &User) -> Result<i64, LedgerError> {
    caller
        .role
        .customer_id()
        .ok_or_else(|| LedgerError::forbidden("only customers can manage favorites"))
}

pub async fn add(store: &dyn Store, caller: &User, business_id: i64) -> Result<Favorite, LedgerError> {
    let customer_id = customer_id(caller)?;
    if store.find_user_by_business(business_id).await?.is_none() {
        return Err(LedgerError::NotFound("business"));
    }
    Ok(store.insert_favorite(customer_id, business_id).await?)
}

pub async fn remove(store: &dyn Store, caller: &User, business_id: i64) -> Result<(), LedgerError> {
    let customer_id = customer_id(caller)?;
    if store.delete_favorite(customer_id, business_id).await? {
        Ok(())
    } else {
        Err(LedgerError::NotFound("favorite"))
    }
}

pub async fn list(store: &dyn Store, caller: &User) -> Result<Vec<Favorite>, LedgerError> {
    let customer_id = customer_id(caller)?;
    Ok(store.list_favorites(customer_id).await?)
}

/// Always `false` for callers that are not customers.
pub async fn is_favorite(
    store: &dyn Store,
    caller: &User,
    business_id: i64,
) -> Result<bool, LedgerError> {
    match caller.role.customer_id() {
        Some(customer_id) => Ok(store.is_favorite(customer_id, business_id).await?),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use crate::types::{NewProfile, NewUser, Role};

    async fn setup() -> (MemoryStore, User, User) {
        let store = MemoryStore::new();
        let customer = store
            .create_user(NewUser {
                email: "c@example.com".into(),
                full_name: "Customer".into(),
                phone_number: None,
                profile: NewProfile::Customer,
            })
            .await
            .unwrap();
        let business = store
            .create_user(NewUser {
                email: "b@example.com".into(),
                full_name: "Owner".into(),
                phone_number: None,
                profile: NewProfile::Business {
                    business_name: "Corner Shop".into(),
                },
            })
            .await
            .unwrap();
        (store, customer, business)
    }

    fn business_id(user: &User) -> i64 {
        match user.role {
            Role::Business { business_id, .. } => business_id,
            Role::Customer { .. } => panic!("not a business"),
        }
    }

    #[tokio::test]
    async fn customers_keep_favorites() {
        let (store, customer, business) = setup().await;
        let id = business_id(&business);

        let fav = add(&store, &customer, id).await.unwrap();
        assert_eq!(fav.business_name, "Corner Shop");
        assert!(is_favorite(&store, &customer, id).await.unwrap());
        assert!(matches!(
            add(&store, &customer, id).await,
            Err(LedgerError::Store(StoreError::Duplicate(_)))
        ));
        assert_eq!(list(&store, &customer).await.unwrap().len(), 1);

        remove(&store, &customer, id).await.unwrap();
        assert!(matches!(
            remove(&store, &customer, id).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn businesses_cannot_keep_favorites() {
        let (store, _, business) = setup().await;
        let id = business_id(&business);
        assert!(matches!(
            add(&store, &business, id).await,
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(list(&store, &business).await, Err(LedgerError::Forbidden(_))));
        assert!(!is_favorite(&store, &business, id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_business_is_not_found() {
        let (store, customer, _) = setup().await;
        assert!(matches!(
            add(&store, &customer, 9999).await,
            Err(LedgerError::NotFound("business"))
        ));
    }
}
