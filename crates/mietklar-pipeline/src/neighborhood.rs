//! Neighborhood enrichment stage: geocode, composite, narrate.

use tracing::{debug, error, info, warn};

use mietklar_core::defaults::{MAP_HEIGHT_PX, MAP_WIDTH_PX};
use mietklar_core::{ChatBackend, Geocoder, ImageInput, TileFetcher};

use crate::map::{compose_map, encode_png};
use crate::prompts::neighborhood_prompt;

/// Produce a prose description of the property's surroundings.
///
/// Every failure mode is non-fatal: an empty address, a geocoding miss, a
/// compositing error, or a vision call failure all yield an empty narrative
/// and the tokens actually spent (zero unless the model was reached).
pub async fn analyze_neighborhood(
    backend: &dyn ChatBackend,
    geocoder: &dyn Geocoder,
    fetcher: &dyn TileFetcher,
    address: &str,
) -> (String, u64) {
    if address.is_empty() {
        return (String::new(), 0);
    }

    debug!(address, "Analyzing neighborhood");

    let point = match geocoder.geocode(address).await {
        Ok(Some(point)) => point,
        Ok(None) => {
            warn!(address, "Address could not be geocoded");
            return (String::new(), 0);
        }
        Err(e) => {
            error!(address, error = %e, "Geocoding failed");
            return (String::new(), 0);
        }
    };

    let map = match compose_map(fetcher, point, MAP_WIDTH_PX, MAP_HEIGHT_PX).await {
        Ok(map) => map,
        Err(e) => {
            error!(error = %e, "Failed to compose neighborhood map");
            return (String::new(), 0);
        }
    };

    let png = match encode_png(&map) {
        Ok(png) => png,
        Err(e) => {
            error!(error = %e, "Failed to encode neighborhood map");
            return (String::new(), 0);
        }
    };

    let images = [ImageInput {
        mime_type: "image/png".to_string(),
        data: png,
    }];

    match backend
        .generate_with_images(&neighborhood_prompt(address), "", &images)
        .await
    {
        Ok(gen) => {
            info!(
                chars = gen.text.len(),
                token_count = gen.token_count,
                "Neighborhood analysis complete"
            );
            (gen.text.trim().to_string(), gen.token_count)
        }
        Err(e) => {
            error!(error = %e, "Neighborhood narration failed");
            (String::new(), 0)
        }
    }
}
