//! Building a publish: create it, add items while PENDING, request commit.

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::contract::{ItemFilter, Session};
use crate::error::{PublishError, StoreError};
use crate::model::{NewItem, Publish, PublishState};

/// Create and commit a new PENDING publish for `env`.
pub fn create_publish<S>(session: &S, env: &str, settings: &Settings) -> Result<Publish, PublishError>
where
    S: Session + ?Sized,
{
    settings.environment(env)?;

    let mut publish = Publish::new(env);
    publish.touch();
    session.save_publish(&publish)?;
    session.commit()?;

    info!(publish_id = %publish.id, env, "Created publish");
    Ok(publish)
}

/// Validate `items` and add them to a PENDING publish.
///
/// Items replace any existing item with the same `web_uri`. Nothing is
/// added unless every item is valid and the whole batch is stored.
pub fn add_items<S>(
    session: &S,
    publish_id: Uuid,
    items: Vec<NewItem>,
    index_filename: &str,
) -> Result<usize, PublishError>
where
    S: Session + ?Sized,
{
    let mut publish = pending_publish(session, publish_id)?;

    let validated = items
        .iter()
        .map(|item| item.validate(index_filename))
        .collect::<Result<Vec<_>, _>>()?;

    let count = validated.len();
    let staged = stage_items(session, publish_id, validated).and_then(|()| {
        publish.touch();
        session.save_publish(&publish)?;
        session.commit()
    });
    if let Err(err) = staged {
        session.rollback();
        return Err(err.into());
    }

    info!(%publish_id, count, "Added items to publish");
    Ok(count)
}

/// Move a PENDING publish to COMMITTING. Requesting again while it is
/// already COMMITTING is a no-op.
pub fn request_commit<S>(session: &S, publish_id: Uuid) -> Result<Publish, PublishError>
where
    S: Session + ?Sized,
{
    let mut publish = session
        .publish(publish_id)?
        .ok_or(PublishError::NotFound(publish_id))?;

    match publish.state {
        PublishState::Pending => {
            publish.transition(PublishState::Committing);
            session.save_publish(&publish)?;
            session.commit()?;
            info!(%publish_id, "Publish enqueued for commit");
        }
        PublishState::Committing => {
            debug!(%publish_id, "Publish already committing");
        }
        state => {
            return Err(PublishError::InvalidState {
                id: publish_id,
                state,
            })
        }
    }
    Ok(publish)
}

fn stage_items<S>(session: &S, publish_id: Uuid, items: Vec<NewItem>) -> Result<(), StoreError>
where
    S: Session + ?Sized,
{
    for new_item in items {
        let existing = session.items(publish_id, &ItemFilter::WebUri(new_item.web_uri.clone()))?;
        let mut item = new_item.into_item(publish_id);
        if let Some(existing) = existing.first() {
            debug!(web_uri = %item.web_uri, "Replacing existing item");
            item.id = existing.id;
        }
        session.add_item(item)?;
    }
    Ok(())
}

fn pending_publish<S>(session: &S, publish_id: Uuid) -> Result<Publish, PublishError>
where
    S: Session + ?Sized,
{
    let publish = session
        .publish(publish_id)?
        .ok_or(PublishError::NotFound(publish_id))?;
    if publish.state != PublishState::Pending {
        return Err(PublishError::InvalidState {
            id: publish_id,
            state: publish.state,
        });
    }
    Ok(publish)
}
