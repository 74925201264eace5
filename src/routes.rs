use crate::auth::{AuthKey, Caller};
use crate::error::{LedgerError, Result, StoreError};
use crate::ledger::{ExpenseDraft, ExpenseEdit, Ledger};
use crate::money::parse_amount;
use crate::schemas::{ExpenseId, GroupId, Shares, User, UserId};
use actix_web::{
    delete, get, http::StatusCode, post, put, web, HttpResponse, ResponseError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::SplitMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::OwnershipMismatch { .. } | LedgerError::AccessDenied(_) => {
                StatusCode::FORBIDDEN
            }
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            LedgerError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            LedgerError::SplitMismatch { computed, expected } => json!({
                "error": self.to_string(),
                "computed": computed,
                "expected": expected,
            }),
            LedgerError::Store(StoreError::Conflict(reason)) => json!({
                "error": "The ledger changed while saving, reload and try again",
                "reason": reason,
            }),
            LedgerError::Store(err) => {
                tracing::error!("Store failure: {err}");
                json!({ "error": "Internal server error" })
            }
            _ => json!({ "error": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Amounts arrive either as JSON strings (form style) or as JSON numbers.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Text(String),
    Number(serde_json::Number),
}

impl AmountField {
    fn parse(&self) -> Result<Decimal> {
        match self {
            AmountField::Text(text) => parse_amount(text),
            AmountField::Number(number) => parse_amount(&number.to_string()),
        }
    }
}

fn parse_shares(shares: &BTreeMap<UserId, AmountField>) -> Result<Shares> {
    shares
        .iter()
        .map(|(user, amount)| Ok((user.clone(), amount.parse()?)))
        .collect()
}

#[derive(Deserialize)]
struct RegisterJson {
    name: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginJson {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct SessionJson {
    user: User,
    token: String,
}

#[derive(Deserialize, Serialize)]
struct GroupNameJson {
    name: String,
}

#[derive(Deserialize)]
struct FriendJson {
    user_id: UserId,
}

#[derive(Deserialize)]
struct InviteJson {
    user_ids: Vec<UserId>,
}

#[derive(Deserialize)]
struct ExpenseJson {
    description: String,
    amount: AmountField,
    paid_by: UserId,
    shares: BTreeMap<UserId, AmountField>,
}

impl ExpenseJson {
    fn into_draft(self, group_id: Option<GroupId>) -> Result<ExpenseDraft> {
        Ok(ExpenseDraft {
            amount: self.amount.parse()?,
            shares: parse_shares(&self.shares)?,
            description: self.description,
            payer: self.paid_by,
            group_id,
        })
    }
}

#[derive(Deserialize)]
struct EditExpenseJson {
    group_id: Option<GroupId>,
    description: String,
    amount: AmountField,
    paid_by: UserId,
    shares: BTreeMap<UserId, AmountField>,
}

#[derive(Serialize)]
struct BalanceJson {
    balance: Decimal,
}

#[post("/users")]
async fn register(
    ledger: web::Data<Ledger>,
    key: web::Data<AuthKey>,
    json: web::Json<RegisterJson>,
) -> Result<HttpResponse> {
    let json = json.into_inner();
    let user = ledger
        .register_user(&json.name, &json.username, &json.password)
        .await?;
    let token = key.issue_token(&user.id);
    Ok(HttpResponse::Created().json(SessionJson { user, token }))
}

#[post("/login")]
async fn login(
    ledger: web::Data<Ledger>,
    key: web::Data<AuthKey>,
    json: web::Json<LoginJson>,
) -> Result<HttpResponse> {
    let user = ledger.authenticate(&json.username, &json.password).await?;
    let token = key.issue_token(&user.id);
    Ok(HttpResponse::Ok().json(SessionJson { user, token }))
}

#[get("/users")]
async fn list_users(ledger: web::Data<Ledger>, Caller(actor): Caller) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ledger.user_directory(&actor).await?))
}

#[get("/users/{username}")]
async fn get_user(
    ledger: web::Data<Ledger>,
    _caller: Caller,
    username: web::Path<String>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ledger.find_user(&username).await?))
}

#[post("/groups")]
async fn add_group(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    json: web::Json<GroupNameJson>,
) -> Result<HttpResponse> {
    let group = ledger.create_group(&actor, &json.name).await?;
    Ok(HttpResponse::Created().json(group))
}

#[post("/friends")]
async fn add_friend(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    json: web::Json<FriendJson>,
) -> Result<HttpResponse> {
    let group = ledger.create_friend(&actor, &json.user_id).await?;
    Ok(HttpResponse::Created().json(group))
}

#[put("/groups/{id}/members")]
async fn invite_members(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    id: web::Path<String>,
    json: web::Json<InviteJson>,
) -> Result<HttpResponse> {
    let group = GroupId::new(id.into_inner());
    let added = ledger.invite_members(&actor, &group, &json.user_ids).await?;
    Ok(HttpResponse::Ok().json(json!({ "added": added })))
}

#[delete("/groups/{id}/members/me")]
async fn leave_group(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    ledger
        .leave_group(&actor, &GroupId::new(id.into_inner()))
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/groups/{id}")]
async fn get_group(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let view = ledger
        .group_view(&actor, &GroupId::new(id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

#[get("/groups/{id}/balance")]
async fn get_group_balance(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let balance = ledger
        .balance_for_user_in_group(&actor, &GroupId::new(id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(BalanceJson { balance }))
}

#[post("/groups/{id}/expenses")]
async fn add_group_expense(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    id: web::Path<String>,
    json: web::Json<ExpenseJson>,
) -> Result<HttpResponse> {
    let draft = json
        .into_inner()
        .into_draft(Some(GroupId::new(id.into_inner())))?;
    let record = ledger.create_expense(&actor, draft).await?;
    Ok(HttpResponse::Created().json(record))
}

#[delete("/groups/{id}/expenses/{expense_id}")]
async fn delete_group_expense(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (group, expense) = path.into_inner();
    ledger
        .delete_expense(&actor, &ExpenseId::new(expense), Some(&GroupId::new(group)))
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/expenses")]
async fn add_personal_expense(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    json: web::Json<ExpenseJson>,
) -> Result<HttpResponse> {
    let draft = json.into_inner().into_draft(None)?;
    let record = ledger.create_expense(&actor, draft).await?;
    Ok(HttpResponse::Created().json(record))
}

#[put("/expenses/{id}")]
async fn edit_expense(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    id: web::Path<String>,
    json: web::Json<EditExpenseJson>,
) -> Result<HttpResponse> {
    let json = json.into_inner();
    let edit = ExpenseEdit {
        amount: json.amount.parse()?,
        shares: parse_shares(&json.shares)?,
        description: json.description,
        payer: json.paid_by,
    };
    let record = ledger
        .edit_expense(
            &actor,
            &ExpenseId::new(id.into_inner()),
            json.group_id.as_ref(),
            edit,
        )
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

#[delete("/expenses/{id}")]
async fn delete_personal_expense(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    ledger
        .delete_expense(&actor, &ExpenseId::new(id.into_inner()), None)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/")]
async fn index(ledger: web::Data<Ledger>, Caller(actor): Caller) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ledger.overview(&actor).await?))
}

#[get("/balance")]
async fn get_balance(ledger: web::Data<Ledger>, Caller(actor): Caller) -> Result<HttpResponse> {
    let balance = ledger.balance_for_user(&actor).await?;
    Ok(HttpResponse::Ok().json(BalanceJson { balance }))
}

#[get("/friends/{user_id}/balance")]
async fn get_friend_balance(
    ledger: web::Data<Ledger>,
    Caller(actor): Caller,
    user_id: web::Path<String>,
) -> Result<HttpResponse> {
    let balance = ledger
        .balance_between(&actor, &UserId::new(user_id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(BalanceJson { balance }))
}

#[get("/activity")]
async fn get_activity(ledger: web::Data<Ledger>, Caller(actor): Caller) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ledger.list_activity(&actor).await?))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register)
        .service(login)
        .service(list_users)
        .service(get_user)
        .service(add_group)
        .service(add_friend)
        .service(invite_members)
        .service(leave_group)
        .service(get_group)
        .service(get_group_balance)
        .service(add_group_expense)
        .service(delete_group_expense)
        .service(add_personal_expense)
        .service(edit_expense)
        .service(delete_personal_expense)
        .service(index)
        .service(get_balance)
        .service(get_friend_balance)
        .service(get_activity);
}
