//! Page text + image OCR aggregation

use std::time::Duration;

use fh_core::{ImagePayload, ScrapeConfig};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::Html;
use tracing::{error, info, warn};
use url::Url;

use crate::error::{Result, ScrapeError};
use crate::html::{image_sources, visible_text};
use crate::ocr::{ImageTextExtractor, TesseractCli};

/// Page text followed by OCR fragments, space-separated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentCorpus {
    text: String,
}

impl ContentCorpus {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn push_fragment(&mut self, fragment: &str) {
        self.text.push(' ');
        self.text.push_str(fragment);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Fetches a page and merges its visible text with the text of its images
pub struct PageContentAggregator {
    client: Client,
    extractor: ImageTextExtractor,
    timeout: Duration,
}

impl PageContentAggregator {
    pub fn new(extractor: ImageTextExtractor, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            extractor,
            timeout,
        })
    }

    /// Aggregator backed by the Tesseract CLI
    pub fn from_config(config: &ScrapeConfig) -> Result<Self> {
        let ocr = TesseractCli::new(&config.tesseract_cmd, &config.ocr_language);
        Self::new(ImageTextExtractor::new(Box::new(ocr)), config.request_timeout())
    }

    /// Corpus for `url`; empty when the page itself cannot be fetched
    pub async fn aggregate(&self, url: &str) -> ContentCorpus {
        let page_url = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                error!("Error fetching page {}: {}", url, e);
                return ContentCorpus::default();
            }
        };

        let body = match self.fetch_page(&page_url).await {
            Ok(body) => body,
            Err(e) => {
                error!("Error fetching page {}: {}", url, e);
                return ContentCorpus::default();
            }
        };

        let (text, sources) = {
            let document = Html::parse_document(&body);
            (visible_text(&document), image_sources(&document))
        };

        let mut corpus = ContentCorpus::new(text);
        for src in sources {
            match self.image_text(&page_url, &src).await {
                Ok(fragment) => corpus.push_fragment(&fragment),
                Err(e) => warn!("Skipping image {}: {}", src, e),
            }
        }

        corpus
    }

    async fn fetch_page(&self, url: &Url) -> Result<String> {
        info!(url = %url, "Fetching product page");

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status()));
        }

        Ok(response.text().await?)
    }

    async fn image_text(&self, page_url: &Url, src: &str) -> Result<String> {
        let bytes = if ImagePayload::is_data_url(src) {
            let payload = ImagePayload::from_data_url(src)
                .ok_or_else(|| ScrapeError::NotAnImage("non-base64 data URL".to_string()))?;
            if !payload.is_image() {
                return Err(ScrapeError::NotAnImage(payload.media_type));
            }
            payload.decode()?
        } else {
            self.fetch_image(&page_url.join(src)?).await?
        };

        let text = self.extractor.extract(&bytes).await?;
        info!(
            "OCR from image at {} extracted text length: {}",
            short_src(src),
            text.trim().chars().count()
        );
        Ok(text)
    }

    async fn fetch_image(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.contains("image") {
            return Err(ScrapeError::NotAnImage(content_type));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Keeps log lines readable for inline `data:` images
fn short_src(src: &str) -> &str {
    match src.char_indices().nth(64) {
        Some((idx, _)) => &src[..idx],
        None => src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::TextRecognizer;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Reads back the image width as "text" so fragments are distinguishable
    struct WidthReader;

    #[async_trait]
    impl TextRecognizer for WidthReader {
        async fn recognize(&self, image: &DynamicImage) -> Result<String> {
            Ok(format!("w{}", image.width()))
        }
    }

    fn png(width: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 1, Rgb([0, 0, 0])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn aggregator() -> PageContentAggregator {
        PageContentAggregator::new(
            ImageTextExtractor::new(Box::new(WidthReader)),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    async fn mount_page(server: &MockServer, html: &str) {
        Mock::given(method("GET"))
            .and(path("/product"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(html.to_string()),
            )
            .mount(server)
            .await;
    }

    async fn mount_image(server: &MockServer, at: &str, width: u32) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png(width)),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_page_without_images_is_plain_text() {
        let server = MockServer::start().await;
        mount_page(&server, "<html><body><h1>Desi Ghee</h1><p>Lic No 123</p></body></html>").await;

        let corpus = aggregator()
            .aggregate(&format!("{}/product", server.uri()))
            .await;

        assert_eq!(corpus.as_str(), "Desi Ghee Lic No 123");
    }

    #[tokio::test]
    async fn test_ocr_fragments_follow_page_text_in_order() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            r#"<body><p>Label</p><img src="/img/front.png"><img src="img/back.png"></body>"#,
        )
        .await;
        mount_image(&server, "/img/front.png", 3).await;
        mount_image(&server, "/img/back.png", 5).await;

        let corpus = aggregator()
            .aggregate(&format!("{}/product", server.uri()))
            .await;

        // 2x upscale before recognition
        assert_eq!(corpus.as_str(), "Label w6 w10");
    }

    #[tokio::test]
    async fn test_failing_images_are_skipped() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            r#"<body><p>Label</p>
            <img src="/banner.svg"><img src="/gone.png"><img src="/ok.png"><img src="/broken.png"></body>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/banner.svg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<svg/>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_image(&server, "/ok.png", 2).await;
        Mock::given(method("GET"))
            .and(path("/broken.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(b"garbage".to_vec()),
            )
            .mount(&server)
            .await;

        let corpus = aggregator()
            .aggregate(&format!("{}/product", server.uri()))
            .await;

        assert_eq!(corpus.as_str(), "Label w4");
    }

    #[tokio::test]
    async fn test_data_url_images_are_decoded_in_place() {
        use fh_core::ImagePayload;

        let server = MockServer::start().await;
        let inline = ImagePayload::from_bytes("image/png", &png(7));
        mount_page(
            &server,
            &format!(
                r#"<body>Pack<img src="data:{};base64,{}"></body>"#,
                inline.media_type, inline.data
            ),
        )
        .await;

        let corpus = aggregator()
            .aggregate(&format!("{}/product", server.uri()))
            .await;

        assert_eq!(corpus.as_str(), "Pack w14");
    }

    #[tokio::test]
    async fn test_page_fetch_failure_yields_empty_corpus() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let agg = aggregator();
        assert!(agg.aggregate(&format!("{}/product", server.uri())).await.is_empty());
        assert!(agg.aggregate("not a url").await.is_empty());
    }

    #[test]
    fn test_short_src() {
        assert_eq!(short_src("/a.png"), "/a.png");
        let long = "x".repeat(100);
        assert_eq!(short_src(&long).len(), 64);
    }
}
