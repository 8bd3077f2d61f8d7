//! Neighborhood map assembly: geocoding, Web-Mercator tile math, and tile
//! compositing.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use serde::Deserialize;
use tracing::{debug, warn};

use mietklar_core::defaults::{
    GEOCODE_BASE_URL, MAP_ZOOM, TILE_BASE_URL, TILE_FETCH_TIMEOUT_SECS, TILE_SIZE,
};
use mietklar_core::{Error, GeoPoint, Geocoder, Result, TileFetcher};

/// User agent sent to the public OSM services, per their usage policy.
const USER_AGENT: &str = "mietklar/0.4 (kontakt@mietklar.example) contract neighborhood analysis";

/// Pause between successive tile requests, OSM tile server etiquette.
const TILE_FETCH_DELAY_MS: u64 = 100;

// =============================================================================
// TILE MATH
// =============================================================================

/// Web-Mercator tile index containing a coordinate at the given zoom.
pub fn tile_for(point: GeoPoint, zoom: u32) -> (i64, i64) {
    let n = f64::from(1u32 << zoom);
    let lat_rad = point.lat.to_radians();
    let x = ((point.lon + 180.0) / 360.0 * n).floor() as i64;
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0 * n)
        .floor() as i64;
    (x, y)
}

/// Tiles needed along one axis to cover `dim_px`, with one tile of margin.
fn tiles_for_dimension(dim_px: u32) -> i64 {
    (dim_px as i64 + TILE_SIZE as i64 - 1) / TILE_SIZE as i64 + 1
}

// =============================================================================
// COMPOSITING
// =============================================================================

/// Compose a map image of exactly `width_px` x `height_px` centered on the
/// geocoded point's tile.
///
/// Out-of-range tile indices are skipped; a failed tile fetch leaves its
/// cell blank rather than failing the composite.
pub async fn compose_map(
    fetcher: &dyn TileFetcher,
    point: GeoPoint,
    width_px: u32,
    height_px: u32,
) -> Result<RgbaImage> {
    let zoom = MAP_ZOOM;
    let n = 1i64 << zoom;
    let (center_x, center_y) = tile_for(point, zoom);

    let tiles_x = tiles_for_dimension(width_px);
    let tiles_y = tiles_for_dimension(height_px);
    let start_x = center_x - tiles_x / 2;
    let start_y = center_y - tiles_y / 2;

    let mut canvas = RgbaImage::new(tiles_x as u32 * TILE_SIZE, tiles_y as u32 * TILE_SIZE);

    for gx in 0..tiles_x {
        for gy in 0..tiles_y {
            let tile_x = start_x + gx;
            let tile_y = start_y + gy;
            if tile_x < 0 || tile_y < 0 || tile_x >= n || tile_y >= n {
                continue;
            }

            match fetcher.fetch(zoom, tile_x as u32, tile_y as u32).await {
                Ok(bytes) => match image::load_from_memory(&bytes) {
                    Ok(tile) => {
                        imageops::replace(
                            &mut canvas,
                            &tile.to_rgba8(),
                            gx * TILE_SIZE as i64,
                            gy * TILE_SIZE as i64,
                        );
                    }
                    Err(e) => {
                        warn!(tile_x, tile_y, error = %e, "Failed to decode map tile");
                    }
                },
                Err(e) => {
                    warn!(tile_x, tile_y, error = %e, "Failed to fetch map tile");
                }
            }
        }
    }

    // Crop to the requested size around the canvas center.
    let canvas_w = canvas.width();
    let canvas_h = canvas.height();
    let left = canvas_w / 2 - width_px / 2;
    let top = canvas_h / 2 - height_px / 2;
    Ok(imageops::crop_imm(&canvas, left, top, width_px, height_px).to_image())
}

/// Encode a composited map as PNG bytes for the vision call.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("Failed to encode map image: {}", e)))?;
    Ok(buf)
}

// =============================================================================
// HTTP COLLABORATORS
// =============================================================================

/// Nominatim-compatible forward geocoder.
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

impl HttpGeocoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Create from environment variables, falling back to the public service.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("GEOCODE_BASE_URL").unwrap_or_else(|_| GEOCODE_BASE_URL.to_string()),
        )
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>> {
        let url = format!("{}/search.php", self.base_url.trim_end_matches('/'));
        debug!(address, "Geocoding address");

        let results: Vec<NominatimResult> = self
            .client
            .get(&url)
            .query(&[("q", address), ("format", "jsonv2")])
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| Error::Geocoding(format!("Geocoding request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Geocoding(format!("Geocoding service error: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Geocoding(format!("Invalid geocoding response: {}", e)))?;

        let Some(first) = results.first() else {
            return Ok(None);
        };

        let lat = first
            .lat
            .parse::<f64>()
            .map_err(|e| Error::Geocoding(format!("Invalid latitude: {}", e)))?;
        let lon = first
            .lon
            .parse::<f64>()
            .map_err(|e| Error::Geocoding(format!("Invalid longitude: {}", e)))?;

        Ok(Some(GeoPoint { lat, lon }))
    }
}

/// OSM-compatible slippy map tile fetcher.
pub struct HttpTileFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTileFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Create from environment variables, falling back to the public service.
    pub fn from_env() -> Self {
        Self::new(std::env::var("TILE_BASE_URL").unwrap_or_else(|_| TILE_BASE_URL.to_string()))
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, zoom: u32, x: u32, y: u32) -> Result<Vec<u8>> {
        // Rate courtesy toward the public tile servers.
        tokio::time::sleep(Duration::from_millis(TILE_FETCH_DELAY_MS)).await;

        let url = format!(
            "{}/{}/{}/{}.png",
            self.base_url.trim_end_matches('/'),
            zoom,
            x,
            y
        );

        let bytes = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(TILE_FETCH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| Error::Request(format!("Tile request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Request(format!("Tile server error: {}", e)))?
            .bytes()
            .await
            .map_err(|e| Error::Request(format!("Tile body read failed: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubTileFetcher {
        calls: Mutex<Vec<(u32, u32, u32)>>,
        tile: Vec<u8>,
    }

    impl StubTileFetcher {
        fn new() -> Self {
            // Solid red 256x256 tile.
            let img = RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, image::Rgba([255, 0, 0, 255]));
            Self {
                calls: Mutex::new(Vec::new()),
                tile: encode_png(&img).unwrap(),
            }
        }
    }

    #[async_trait]
    impl TileFetcher for StubTileFetcher {
        async fn fetch(&self, zoom: u32, x: u32, y: u32) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push((zoom, x, y));
            Ok(self.tile.clone())
        }
    }

    struct FailingTileFetcher;

    #[async_trait]
    impl TileFetcher for FailingTileFetcher {
        async fn fetch(&self, _zoom: u32, _x: u32, _y: u32) -> Result<Vec<u8>> {
            Err(Error::Request("tile server down".to_string()))
        }
    }

    #[test]
    fn tile_math_reference_points() {
        // Origin of the tile grid.
        assert_eq!(
            tile_for(GeoPoint { lat: 85.0511, lon: -180.0 }, 0),
            (0, 0)
        );
        // Equator/prime meridian lands in the lower-right quadrant at zoom 1.
        assert_eq!(tile_for(GeoPoint { lat: 0.0, lon: 0.0 }, 1), (1, 1));
        // Tübingen at zoom 16.
        let (x, y) = tile_for(GeoPoint { lat: 48.5216, lon: 9.0576 }, 16);
        assert_eq!((x, y), (34416, 22638));
    }

    #[test]
    fn tile_counts_cover_dimension_with_margin() {
        assert_eq!(tiles_for_dimension(800), 5); // ceil(800/256)+1
        assert_eq!(tiles_for_dimension(600), 4);
        assert_eq!(tiles_for_dimension(256), 2);
    }

    #[tokio::test]
    async fn compose_map_produces_requested_size() {
        let fetcher = StubTileFetcher::new();
        let point = GeoPoint { lat: 48.5216, lon: 9.0576 };

        let img = compose_map(&fetcher, point, 800, 600).await.unwrap();
        assert_eq!(img.dimensions(), (800, 600));
        // 5x4 tile grid fetched.
        assert_eq!(fetcher.calls.lock().unwrap().len(), 20);
        // Center of the composite is covered by a fetched tile.
        assert_eq!(*img.get_pixel(400, 300), image::Rgba([255, 0, 0, 255]));
    }

    #[tokio::test]
    async fn failed_tiles_leave_blank_cells() {
        let point = GeoPoint { lat: 48.5216, lon: 9.0576 };
        let img = compose_map(&FailingTileFetcher, point, 400, 300).await.unwrap();
        assert_eq!(img.dimensions(), (400, 300));
        // Blank canvas, not an error.
        assert_eq!(*img.get_pixel(200, 150), image::Rgba([0, 0, 0, 0]));
    }

    #[tokio::test]
    async fn out_of_range_tiles_are_skipped() {
        let fetcher = StubTileFetcher::new();
        // Near the antimeridian at a low implied tile index the grid margin
        // would reach negative x without the range check.
        let point = GeoPoint { lat: 84.9, lon: -179.99 };
        let img = compose_map(&fetcher, point, 800, 600).await.unwrap();
        assert_eq!(img.dimensions(), (800, 600));
        for (_, x, y) in fetcher.calls.lock().unwrap().iter() {
            let n = 1u32 << MAP_ZOOM;
            assert!(*x < n && *y < n);
        }
    }

    #[tokio::test]
    async fn geocoder_returns_first_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.php"))
            .and(query_param("format", "jsonv2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"lat": "48.5216", "lon": "9.0576", "display_name": "Tübingen"},
                {"lat": "0.0", "lon": "0.0", "display_name": "anderswo"}
            ])))
            .mount(&server)
            .await;

        let geocoder = HttpGeocoder::new(server.uri());
        let point = geocoder
            .geocode("Hauptstraße 12 72070 Tübingen")
            .await
            .unwrap()
            .unwrap();
        assert!((point.lat - 48.5216).abs() < 1e-9);
        assert!((point.lon - 9.0576).abs() < 1e-9);
    }

    #[tokio::test]
    async fn geocoder_miss_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let geocoder = HttpGeocoder::new(server.uri());
        assert!(geocoder.geocode("Nirgendwo 99").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tile_fetcher_requests_slippy_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/16/34416/22638.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpTileFetcher::new(server.uri());
        let bytes = fetcher.fetch(16, 34416, 22638).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
