// tests/pipeline.rs
//! Full pipeline runs against an in-memory transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Instant;

use holdings_harvester::config::{FetchConfig, HarvestConfig};
use holdings_harvester::edgar::models::{QuarterPeriod, ShareType};
use holdings_harvester::edgar::transport::{Transport, TransportError, TransportResponse};
use holdings_harvester::edgar::{EdgarClient, RateLimiter};
use holdings_harvester::pipeline::{CancelFlag, Pipeline, RunOutcome};
use holdings_harvester::utils::error::{FetchError, FilingError, RowParseError};

const APPLE_FILING_URL: &str = "https://www.sec.gov/Archives/edgar/data/320193/0000320193-21-000010.txt";
const BERKSHIRE_FILING_URL: &str =
    "https://www.sec.gov/Archives/edgar/data/1067983/0000950123-21-002019.txt";

const INDEX_2021_Q1: &str = "Description:           Master Index of EDGAR Dissemination Feed
Last Data Received:    March 31, 2021

CIK|Company Name|Form Type|Date Filed|Filename
--------------------------------------------------------------------------------
320193|Apple Inc.|13F-HR|2021-02-01|edgar/data/320193/0000320193-21-000010.txt
320193|Apple Inc.|10-K|2021-01-29|edgar/data/320193/0000320193-21-000005.txt
";

const INDEX_2021_Q1_TWO_FILINGS: &str = "CIK|Company Name|Form Type|Date Filed|Filename
--------------------------------------------------------------------------------
320193|Apple Inc.|13F-HR|2021-02-01|edgar/data/320193/0000320193-21-000010.txt
1067983|BERKSHIRE HATHAWAY INC|13F-HR|2021-02-16|edgar/data/1067983/0000950123-21-002019.txt
";

const EMPTY_INDEX: &str = "CIK|Company Name|Form Type|Date Filed|Filename
--------------------------------------------------------------------------------
";

const APPLE_FILING: &str = "<SEC-DOCUMENT>0000320193-21-000010.txt : 20210201
<SEC-HEADER>0000320193-21-000010.hdr.sgml : 20210201
ACCESSION NUMBER:\t\t0000320193-21-000010
CONFORMED SUBMISSION TYPE:\t13F-HR
PUBLIC DOCUMENT COUNT:\t\t2
CONFORMED PERIOD OF REPORT:\t20201231
FILED AS OF DATE:\t\t20210201

FILER:

\tCOMPANY DATA:
\t\tCOMPANY CONFORMED NAME:\t\t\tApple Inc.
\t\tCENTRAL INDEX KEY:\t\t\t0000320193
\t\tSTATE OF INCORPORATION:\t\t\tCA
</SEC-HEADER>
<DOCUMENT>
<TYPE>INFORMATION TABLE
<TEXT>
<XML>
<informationTable xmlns=\"http://www.sec.gov/edgar/document/thirteenf/informationtable\">
  <infoTable>
    <nameOfIssuer>ALPHA CORP</nameOfIssuer>
    <titleOfClass>COM</titleOfClass>
    <cusip>000000AA1</cusip>
    <value>1500</value>
    <shrsOrPrnAmt><sshPrnamt>300</sshPrnamt><sshPrnamtType>SH</sshPrnamtType></shrsOrPrnAmt>
    <investmentDiscretion>SOLE</investmentDiscretion>
    <votingAuthority><Sole>300</Sole><Shared>0</Shared><None>0</None></votingAuthority>
  </infoTable>
  <infoTable>
    <nameOfIssuer>BETA INC</nameOfIssuer>
    <titleOfClass>COM</titleOfClass>
    <cusip>000000BB2</cusip>
    <value>20</value>
    <shrsOrPrnAmt><sshPrnamt>-40</sshPrnamt><sshPrnamtType>SH</sshPrnamtType></shrsOrPrnAmt>
    <investmentDiscretion>SOLE</investmentDiscretion>
  </infoTable>
  <infoTable>
    <nameOfIssuer>GAMMA LTD</nameOfIssuer>
    <titleOfClass>NOTE 1.5%</titleOfClass>
    <cusip>000000CC3</cusip>
    <value>7</value>
    <shrsOrPrnAmt><sshPrnamt>10000</sshPrnamt><sshPrnamtType>PRN</sshPrnamtType></shrsOrPrnAmt>
    <investmentDiscretion>SOLE</investmentDiscretion>
  </infoTable>
</informationTable>
</XML>
</TEXT>
</DOCUMENT>
</SEC-DOCUMENT>";

/// Serves canned bodies by URL (404 for anything else) and records every request.
#[derive(Default)]
struct MemoryTransport {
    bodies: HashMap<String, (StatusCode, String)>,
    fallback: Option<StatusCode>,
    requests: Mutex<Vec<(String, Instant)>>,
    cancel_after: Option<(String, CancelFlag)>,
}

impl MemoryTransport {
    fn with_index(mut self, year: i32, quarter: u8, body: &str) -> Self {
        let url = QuarterPeriod { year, quarter }.index_url("master.idx");
        self.bodies.insert(url, (StatusCode::OK, body.to_string()));
        self
    }

    fn with_empty_indexes(mut self, years: std::ops::RangeInclusive<i32>) -> Self {
        for year in years {
            for quarter in 1..=4 {
                self = self.with_index(year, quarter, EMPTY_INDEX);
            }
        }
        self
    }

    fn with_body(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), (StatusCode::OK, body.to_string()));
        self
    }

    fn failing_everything(status: StatusCode) -> Self {
        MemoryTransport { fallback: Some(status), ..Self::default() }
    }

    fn cancel_after(mut self, url: &str, flag: CancelFlag) -> Self {
        self.cancel_after = Some((url.to_string(), flag));
        self
    }

    fn requested_urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
    }

    fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push((url.to_string(), Instant::now()));
        if let Some((trigger, flag)) = &self.cancel_after {
            if trigger == url {
                flag.cancel();
            }
        }
        if let Some(status) = self.fallback {
            return Ok(TransportResponse::with_status(status));
        }
        Ok(match self.bodies.get(url) {
            Some((status, body)) => TransportResponse { status: *status, body: body.clone().into_bytes() },
            None => TransportResponse::with_status(StatusCode::NOT_FOUND),
        })
    }
}

fn fetch_config() -> FetchConfig {
    let mut config = FetchConfig::new("Harvest Tests tests@example.com");
    config.min_request_interval = Duration::from_millis(10);
    config.max_retry_attempts = 2;
    config.backoff_base = Duration::from_millis(10);
    config
}

fn pipeline_with(transport: Arc<MemoryTransport>, limiter: Arc<RateLimiter>, start: i32, end: i32) -> Pipeline {
    let fetch = fetch_config();
    let client = EdgarClient::new(&fetch, limiter, transport).unwrap();
    let mut config = HarvestConfig::new(fetch, start, end);
    config.form_type_filter = Some(["13F-HR".to_string()].into_iter().collect());
    config.max_consecutive_failures = 3;
    Pipeline::new(client, config).unwrap()
}

fn pipeline(transport: Arc<MemoryTransport>, start: i32, end: i32) -> Pipeline {
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(10)));
    pipeline_with(transport, limiter, start, end)
}

fn apple_transport() -> MemoryTransport {
    MemoryTransport::default()
        .with_empty_indexes(2021..=2021)
        .with_index(2021, 1, INDEX_2021_Q1)
        .with_body(APPLE_FILING_URL, APPLE_FILING)
}

#[tokio::test(start_paused = true)]
async fn end_to_end_single_filing() {
    let transport = Arc::new(apple_transport());
    let report = pipeline(transport.clone(), 2021, 2021).run(2021, 2021).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.filings_processed, 1);
    assert!(report.filing_failures.is_empty());
    assert!(report.index_failures.is_empty());

    let records = &report.records;
    assert_eq!(records.companies.len(), 1);
    assert_eq!(records.companies[0].accession_number, "0000320193-21-000010");
    assert_eq!(records.companies[0].company.cik, "0000320193");
    assert_eq!(records.companies[0].company.state_of_incorporation.as_deref(), Some("CA"));

    assert_eq!(records.accessions.len(), 1);
    assert_eq!(records.accessions[0].conformed_submission_type.as_deref(), Some("13F-HR"));

    assert_eq!(records.holdings.len(), 2);
    assert_eq!(records.holdings[0].issuer_name, "ALPHA CORP");
    assert_eq!(records.holdings[0].value, 1500);
    assert_eq!(records.holdings[1].issuer_name, "GAMMA LTD");
    assert_eq!(records.holdings[1].shares_or_principal_type, Some(ShareType::Principal));
    assert!(records.holdings.iter().all(|h| h.accession_number == "0000320193-21-000010"));

    assert_eq!(report.skipped_holdings.len(), 1);
    let skip = &report.skipped_holdings[0];
    assert_eq!(skip.accession_number, "0000320193-21-000010");
    assert_eq!(skip.row_index, 1);
    assert_eq!(skip.error, RowParseError::Negative { field: "sshPrnamt", value: "-40".into() });

    // The 10-K row was filtered out before any fetch.
    let urls = transport.requested_urls();
    assert_eq!(urls.len(), 5);
    assert!(!urls.iter().any(|u| u.contains("000005")));
}

#[tokio::test(start_paused = true)]
async fn repeated_runs_are_byte_identical() {
    let transport = Arc::new(apple_transport());
    let first = pipeline(transport.clone(), 2021, 2021).run(2021, 2021).await.unwrap();
    let second = pipeline(transport, 2021, 2021).run(2021, 2021).await.unwrap();

    assert_eq!(
        serde_json::to_string(&first.records).unwrap(),
        serde_json::to_string(&second.records).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn one_index_fetch_per_quarter() {
    let transport = Arc::new(MemoryTransport::default().with_empty_indexes(2018..=2020));
    let report = pipeline(transport.clone(), 2018, 2020).run(2018, 2020).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let urls = transport.requested_urls();
    assert_eq!(urls.len(), 12);
    assert_eq!(urls[0], "https://www.sec.gov/Archives/edgar/full-index/2018/QTR1/master.idx");
    assert_eq!(urls[11], "https://www.sec.gov/Archives/edgar/full-index/2020/QTR4/master.idx");
}

#[tokio::test(start_paused = true)]
async fn missing_quarters_are_reported_not_fatal() {
    // Nothing registered: every index is a 404.
    let transport = Arc::new(MemoryTransport::default());
    let report = pipeline(transport.clone(), 2020, 2021).run(2020, 2021).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.index_failures.len(), 8);
    assert!(matches!(report.index_failures[0].error, FetchError::NotFound { .. }));
    assert_eq!(transport.requested_urls().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn unreachable_archive_aborts_with_partial_report() {
    let transport = Arc::new(MemoryTransport::failing_everything(StatusCode::SERVICE_UNAVAILABLE));
    let report = pipeline(transport.clone(), 2020, 2021).run(2020, 2021).await.unwrap();

    let abort = report.abort().expect("run should abort");
    // A threshold of 3 tolerates three failing quarters and aborts on the fourth.
    assert_eq!(abort.consecutive_failures, 4);
    assert!(matches!(abort.last_error, FetchError::ServerError { status: 503, .. }));
    assert_eq!(report.index_failures.len(), 4);
    // Four quarters, each retried once.
    assert_eq!(transport.requested_urls().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn failing_filing_is_isolated() {
    let transport = Arc::new(
        MemoryTransport::default()
            .with_empty_indexes(2021..=2021)
            .with_index(2021, 1, INDEX_2021_Q1_TWO_FILINGS)
            .with_body(APPLE_FILING_URL, "<DOCUMENT>header went missing</DOCUMENT>")
            .with_body(BERKSHIRE_FILING_URL, &APPLE_FILING.replace("0000320193-21-000010", "0000950123-21-002019")),
    );
    let report = pipeline(transport, 2021, 2021).run(2021, 2021).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.filings_processed, 1);
    assert_eq!(report.filing_failures.len(), 1);
    let failure = &report.filing_failures[0];
    assert_eq!(failure.accession_number.as_deref(), Some("0000320193-21-000010"));
    assert!(matches!(failure.error, FilingError::Header(_)));

    assert_eq!(report.records.accessions.len(), 1);
    assert_eq!(report.records.accessions[0].accession_number, "0000950123-21-002019");
    assert_eq!(report.records.holdings.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_makes_no_requests() {
    let transport = Arc::new(apple_transport());
    let flag = CancelFlag::new();
    flag.cancel();
    let report = pipeline(transport.clone(), 2021, 2021)
        .with_cancel_flag(flag)
        .run(2021, 2021)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(transport.requested_urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_takes_effect_between_filings() {
    let flag = CancelFlag::new();
    let berkshire_body = APPLE_FILING.replace("0000320193-21-000010", "0000950123-21-002019");
    let transport = Arc::new(
        MemoryTransport::default()
            .with_empty_indexes(2021..=2021)
            .with_index(2021, 1, INDEX_2021_Q1_TWO_FILINGS)
            .with_body(APPLE_FILING_URL, APPLE_FILING)
            .with_body(BERKSHIRE_FILING_URL, &berkshire_body)
            .cancel_after(APPLE_FILING_URL, flag.clone()),
    );
    let report = pipeline(transport.clone(), 2021, 2021)
        .with_cancel_flag(flag)
        .run(2021, 2021)
        .await
        .unwrap();

    // The filing in flight when cancellation arrived is still parsed in full.
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.filings_processed, 1);
    assert_eq!(report.records.holdings.len(), 2);
    assert!(!transport.requested_urls().iter().any(|u| u == BERKSHIRE_FILING_URL));
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_share_one_limiter() {
    let interval = Duration::from_millis(50);
    let limiter = Arc::new(RateLimiter::new(interval));
    let transport = Arc::new(MemoryTransport::default().with_empty_indexes(2019..=2020));

    let first = pipeline_with(transport.clone(), limiter.clone(), 2019, 2019);
    let second = pipeline_with(transport.clone(), limiter, 2020, 2020);
    let (a, b) = tokio::join!(first.run(2019, 2019), second.run(2020, 2020));
    assert_eq!(a.unwrap().outcome, RunOutcome::Completed);
    assert_eq!(b.unwrap().outcome, RunOutcome::Completed);

    let mut times = transport.request_times();
    assert_eq!(times.len(), 8);
    times.sort();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= interval, "requests {:?} apart", pair[1] - pair[0]);
    }
}
